pub mod converge;
pub mod mutate;
pub mod report;
pub mod run;
