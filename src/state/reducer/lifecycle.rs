use super::super::run_state::{RunFailure, RunStatus, StepInfo, StepStatus};
use super::state::Fold;
use crate::types::{EventMeta, StepDescriptor};
use serde_json::Value;

impl Fold<'_> {
    pub(super) fn run_started(
        &mut self,
        meta: &EventMeta,
        workflow_id: Option<&str>,
        steps: &[StepDescriptor],
    ) {
        if self.state.status != RunStatus::Idle {
            // A start we had to infer earlier may still carry the step plan.
            if self.state.steps.is_empty() && !steps.is_empty() {
                self.repair("late RUN_STARTED; adopting its step plan");
                self.state.steps = steps.iter().map(step_from_descriptor).collect();
            } else {
                self.ignore("run already started");
            }
            return;
        }

        self.state.status = RunStatus::Running;
        if let Some(workflow_id) = workflow_id {
            self.state.workflow_id = Some(workflow_id.to_string());
        }
        self.state.steps = steps.iter().map(step_from_descriptor).collect();
        self.state.current_step_index = None;
        self.state.started_at = meta.timestamp;
    }

    pub(super) fn run_finished(&mut self, meta: &EventMeta, result: Option<&Value>) {
        self.ensure_started(meta);
        for step in self
            .state
            .steps
            .iter_mut()
            .filter(|step| step.status == StepStatus::Pending)
        {
            step.status = StepStatus::Skipped;
        }
        self.state.status = RunStatus::Completed;
        self.state.result = result.cloned();
        self.finalize(meta);
    }

    pub(super) fn run_error(&mut self, meta: &EventMeta, error: &str, code: Option<&str>) {
        self.state.status = RunStatus::Error;
        self.state.error = Some(RunFailure {
            message: error.to_string(),
            code: code.map(str::to_string),
        });
        self.finalize(meta);
    }

    fn finalize(&mut self, meta: &EventMeta) {
        self.state.finished_at = meta.timestamp;
        self.state.pending_approval = None;
        self.state.pending_actions.clear();
    }

    pub(super) fn step_started(
        &mut self,
        meta: &EventMeta,
        step_index: usize,
        step_id: Option<&str>,
        label: Option<&str>,
    ) {
        self.require_running(meta);
        let index = self.locate_step(step_index, step_id, label);
        let step = &mut self.state.steps[index];
        match step.status {
            StepStatus::Pending => {
                step.status = StepStatus::Running;
                step.started_at = meta.timestamp;
                if step.label.is_empty() {
                    if let Some(label) = label {
                        step.label = label.to_string();
                    }
                }
                self.state.current_step_index = Some(index);
            }
            StepStatus::Running => self.ignore(format!("step {index} is already running")),
            finished => self.ignore(format!("step {index} already ended as {finished:?}")),
        }
    }

    pub(super) fn step_finished(
        &mut self,
        meta: &EventMeta,
        step_index: usize,
        step_id: Option<&str>,
        duration_ms: Option<u64>,
    ) {
        if let Some(index) = self.begin_step_end(meta, step_index, step_id) {
            let step = &mut self.state.steps[index];
            step.status = StepStatus::Completed;
            close_step(step, meta, duration_ms);
        }
    }

    pub(super) fn step_error(
        &mut self,
        meta: &EventMeta,
        step_index: usize,
        step_id: Option<&str>,
        error: &str,
    ) {
        if let Some(index) = self.begin_step_end(meta, step_index, step_id) {
            let step = &mut self.state.steps[index];
            step.status = StepStatus::Error;
            step.error = Some(error.to_string());
            close_step(step, meta, None);
        }
    }

    /// Shared prelude of STEP_FINISHED / STEP_ERROR. Returns the step to close,
    /// inferring a missing STEP_STARTED.
    fn begin_step_end(
        &mut self,
        meta: &EventMeta,
        step_index: usize,
        step_id: Option<&str>,
    ) -> Option<usize> {
        self.require_running(meta);
        let index = self.locate_step(step_index, step_id, None);
        match self.state.steps[index].status {
            StepStatus::Running => Some(index),
            StepStatus::Pending => {
                self.repair(format!("step {index} ended before it started"));
                let step = &mut self.state.steps[index];
                step.status = StepStatus::Running;
                step.started_at = meta.timestamp;
                self.state.current_step_index = Some(index);
                Some(index)
            }
            finished => {
                self.ignore(format!("step {index} already ended as {finished:?}"));
                None
            }
        }
    }

    /// Resolve a step by index, falling back to its id. Unknown steps are
    /// appended to the plan so the event is never lost; the wire index never
    /// sizes the plan.
    fn locate_step(&mut self, step_index: usize, step_id: Option<&str>, label: Option<&str>) -> usize {
        if let Some(step) = self.state.steps.get(step_index) {
            if step_id.map_or(true, |id| id == step.id) {
                return step_index;
            }
        }

        let id = step_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("step-{step_index}"));
        if let Some(position) = self.state.steps.iter().position(|step| step.id == id) {
            if step_id.is_some() {
                self.repair(format!(
                    "stepIndex {step_index} disagrees with stepId '{id}'; using index {position}"
                ));
            }
            return position;
        }

        let position = self.state.steps.len();
        self.repair(format!(
            "step {step_index} ('{id}') was not in the plan; appended at index {position}"
        ));
        let label = label.map(str::to_string).unwrap_or_else(|| id.clone());
        self.state.steps.push(StepInfo::pending(id, label));
        position
    }
}

fn step_from_descriptor(descriptor: &StepDescriptor) -> StepInfo {
    let label = if descriptor.label.is_empty() {
        descriptor.id.clone()
    } else {
        descriptor.label.clone()
    };
    StepInfo::pending(descriptor.id.clone(), label)
}

fn close_step(step: &mut StepInfo, meta: &EventMeta, duration_ms: Option<u64>) {
    step.finished_at = meta.timestamp;
    step.duration_ms = duration_ms.or_else(|| {
        let started = step.started_at?;
        let finished = meta.timestamp?;
        u64::try_from((finished - started).num_milliseconds()).ok()
    });
}
