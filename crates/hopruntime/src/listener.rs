use crate::RunState;
use hopcore::JobResult;

/// Callbacks fired around a whole run
pub trait JobListener: Send + Sync {
    fn job_started(&self, _state: &RunState) {}

    fn job_finished(&self, _state: &RunState, _result: &JobResult) {}
}
