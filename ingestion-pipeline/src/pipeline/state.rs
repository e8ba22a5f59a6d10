use state_machines::state_machine;

state_machine! {
    name: SegmentMachine,
    state: SegmentState,
    initial: Claimed,
    states: [Claimed, Loaded, Extracted, Invoked, Validated, Materialized, Failed],
    events {
        load { transition: { from: Claimed, to: Loaded } }
        extract { transition: { from: Loaded, to: Extracted } }
        invoke { transition: { from: Extracted, to: Invoked } }
        validate { transition: { from: Invoked, to: Validated } }
        materialize { transition: { from: Validated, to: Materialized } }
        abort {
            transition: { from: Claimed, to: Failed }
            transition: { from: Loaded, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Invoked, to: Failed }
            transition: { from: Validated, to: Failed }
            transition: { from: Materialized, to: Failed }
        }
    }
}

pub fn claimed() -> SegmentMachine<(), Claimed> {
    SegmentMachine::new(())
}
