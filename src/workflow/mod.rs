pub mod grade_flow;
pub mod stage;

pub use grade_flow::{batch_grading_workflow, BATCH_GRADING_WORKFLOW};
pub use stage::{
    InterruptRequest, MergeStrategy, Stage, StageCtx, StageOutcome, StateDelta, Workflow,
};
