pub mod boundary;
pub mod grading;
pub mod loaders;
pub mod run;

pub use boundary::{DetectOutcome, DetectionMethod, StudentBoundary, StudentResult};
pub use grading::{
    IdentityMarker, PageGradingResult, PageSpec, PaperFixture, QuestionResult, ScoringPoint,
};
pub use loaders::{load_all_toml_files, load_toml_to_fixture};
pub use run::{Checkpoint, EventKind, Run, RunEvent, RunStatus, StateMap};
