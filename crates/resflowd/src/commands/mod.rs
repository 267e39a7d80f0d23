pub mod jobs;
pub mod run;
pub mod seed;
pub mod sync;
