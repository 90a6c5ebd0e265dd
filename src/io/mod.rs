pub mod sam_output;
pub mod seq_input;
