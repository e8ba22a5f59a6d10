use crate::stored_object;

stored_object!(Work, "works", {
    title: String
});
