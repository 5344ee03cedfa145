//! Cycle states and per-item results, with the integer codes the operator
//! display understands.

use std::fmt;

use rand::Rng;

/// Position of the controller inside one inspection cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CycleState {
    Idle,
    ObjectDetected,
    Processing,
    Accepted,
    Rejected,
    Resetting,
}

impl CycleState {
    pub fn code(self) -> i64 {
        match self {
            CycleState::Idle => 0,
            CycleState::ObjectDetected => 1,
            CycleState::Processing => 2,
            CycleState::Accepted => 3,
            CycleState::Rejected => 4,
            CycleState::Resetting => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::ObjectDetected => "detected",
            CycleState::Processing => "processing",
            CycleState::Accepted => "accepted",
            CycleState::Rejected => "rejected",
            CycleState::Resetting => "resetting",
        }
    }
}

/// Pass/fail indicator shown on the display (`pf` field).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    None,
    Pass,
    Fail,
}

impl Verdict {
    pub fn code(self) -> i64 {
        match self {
            Verdict::None => 0,
            Verdict::Pass => 1,
            Verdict::Fail => 2,
        }
    }
}

/// Class id reported by the model that marks an item as defective.
pub const DEFECT_CLASS_ID: i32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InspectionResult {
    pub class_id: i32,
    pub is_defect: bool,
}

impl InspectionResult {
    pub fn from_class(class_id: i32) -> Self {
        Self {
            class_id,
            is_defect: class_id == DEFECT_CLASS_ID,
        }
    }

    pub fn verdict(&self) -> Verdict {
        if self.is_defect {
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }
}

/// Random five digit tag tying telemetry lines to one physical item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CorrelationId(u32);

impl CorrelationId {
    pub const MIN: u32 = 10_000;
    pub const MAX: u32 = 99_999;

    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(Self::MIN..=Self::MAX))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
