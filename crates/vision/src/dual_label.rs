//! Two-capture records: a shipping label carrying the manifest number, then a
//! product label carrying the model.

use dockscan_core::ScanOutcome;
use tracing::{debug, info};

const RAW_TEXT_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, PartialEq)]
pub enum DualLabelState {
    Idle,
    /// Waiting for a shipping label; nothing staged.
    AwaitingShip,
    /// Shipping label accepted; the product capture has not started yet.
    Staged(Box<ScanOutcome>),
    AwaitingProduct(Box<ScanOutcome>),
    /// Both labels merged into one record.
    Complete(Box<ScanOutcome>),
}

impl DualLabelState {
    pub fn name(&self) -> &'static str {
        match self {
            DualLabelState::Idle => "idle",
            DualLabelState::AwaitingShip => "awaiting_ship",
            DualLabelState::Staged(_) => "staged",
            DualLabelState::AwaitingProduct(_) => "awaiting_product",
            DualLabelState::Complete(_) => "complete",
        }
    }
}

/// What a submitted scan did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum DualLabelStep {
    /// Shipping label staged; scan the product label next.
    Staged,
    Completed(Box<ScanOutcome>),
    /// Nothing changed.
    ScanAgain,
}

impl DualLabelStep {
    pub fn message(&self) -> &'static str {
        match self {
            DualLabelStep::Staged => "Shipping label captured, scan the product label",
            DualLabelStep::Completed(_) => "Record complete",
            DualLabelStep::ScanAgain => "Scan again",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DualLabelSession {
    state: DualLabelState,
}

impl Default for DualLabelSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DualLabelSession {
    pub fn new() -> Self {
        Self { state: DualLabelState::Idle }
    }

    pub fn state(&self) -> &DualLabelState {
        &self.state
    }

    pub fn start(&mut self) {
        if self.state == DualLabelState::Idle {
            self.state = DualLabelState::AwaitingShip;
        }
    }

    /// Staged → AwaitingProduct. No-op in any other state.
    pub fn begin_product(&mut self) {
        self.state = match std::mem::replace(&mut self.state, DualLabelState::Idle) {
            DualLabelState::Staged(staged) => DualLabelState::AwaitingProduct(staged),
            other => other,
        };
    }

    /// Drop anything staged or completed and wait for a new shipping label.
    pub fn reset(&mut self) {
        self.state = DualLabelState::AwaitingShip;
    }

    /// Feed one scan. A shipping label must carry a manifest number and no
    /// model; a product label must carry a model. Anything else leaves the
    /// session untouched.
    pub fn submit(&mut self, outcome: ScanOutcome) -> DualLabelStep {
        let has_manifest = present(&outcome.fields.manifest_number);
        let has_model = present(&outcome.fields.model);

        if self.state == DualLabelState::Idle {
            self.start();
        }
        self.begin_product();

        let (next, step) = match std::mem::replace(&mut self.state, DualLabelState::Idle) {
            DualLabelState::AwaitingShip if has_manifest && !has_model => {
                (DualLabelState::Staged(Box::new(outcome)), DualLabelStep::Staged)
            }
            DualLabelState::AwaitingProduct(staged) if has_model => {
                let merged = Box::new(merge(&staged, &outcome));
                (DualLabelState::Complete(merged.clone()), DualLabelStep::Completed(merged))
            }
            unchanged => (unchanged, DualLabelStep::ScanAgain),
        };
        self.state = next;

        match &step {
            DualLabelStep::Completed(r) => info!(
                manifest = r.fields.manifest_number.as_deref().unwrap_or("-"),
                model = r.fields.model.as_deref().unwrap_or("-"),
                "dual-label record complete"
            ),
            other => debug!(state = self.state.name(), step = ?other, "dual-label step"),
        }
        step
    }
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn merge(ship: &ScanOutcome, product: &ScanOutcome) -> ScanOutcome {
    let mut merged = ship.clone();
    merged.fields.model = product.fields.model.clone();
    if !present(&merged.fields.customer) {
        merged.fields.customer = product.fields.customer.clone();
    }
    merged.source_name = format!("{} + {}", ship.source_name, product.source_name);
    merged.source_digest = None;
    merged.raw_text = format!("{}{RAW_TEXT_SEPARATOR}{}", ship.raw_text, product.raw_text);
    merged
        .crop_suggestions
        .extend(product.crop_suggestions.iter().cloned());
    merged
}
