//! Accessories: observers of the request lifecycle brackets

use crate::request::Request;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::warn;

/// Lifecycle hook invoked with the observed request
pub type AccessoryHook = Arc<dyn Fn(&Request) + Send + Sync>;

/// An observer with optional `will_start`/`will_stop`/`did_stop` hooks.
///
/// Accessories see lifecycle brackets only; they take no part in success or
/// failure delivery.
#[derive(Clone, Default)]
pub struct Accessory {
    name: String,
    will_start: Option<AccessoryHook>,
    will_stop: Option<AccessoryHook>,
    did_stop: Option<AccessoryHook>,
}

impl Accessory {
    /// Accessory with no hooks; `name` shows up in logs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Called before any cache or network work
    #[must_use]
    pub fn on_will_start(mut self, hook: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.will_start = Some(Arc::new(hook));
        self
    }

    /// Called before the delegate and completion callback
    #[must_use]
    pub fn on_will_stop(mut self, hook: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.will_stop = Some(Arc::new(hook));
        self
    }

    /// Called after the delegate and completion callback
    #[must_use]
    pub fn on_did_stop(mut self, hook: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.did_stop = Some(Arc::new(hook));
        self
    }

    /// Name used in logs
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Accessory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessory")
            .field("name", &self.name)
            .field("will_start", &self.will_start.is_some())
            .field("will_stop", &self.will_stop.is_some())
            .field("did_stop", &self.did_stop.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    WillStart,
    WillStop,
    DidStop,
}

impl Phase {
    const fn label(self) -> &'static str {
        match self {
            Self::WillStart => "will_start",
            Self::WillStop => "will_stop",
            Self::DidStop => "did_stop",
        }
    }

    fn hook(self, accessory: &Accessory) -> Option<&AccessoryHook> {
        match self {
            Self::WillStart => accessory.will_start.as_ref(),
            Self::WillStop => accessory.will_stop.as_ref(),
            Self::DidStop => accessory.did_stop.as_ref(),
        }
    }
}

/// Ordered broadcast of lifecycle brackets.
///
/// Accessories run in insertion order. A hook that panics is logged and the
/// remaining accessories still run.
#[derive(Debug, Clone, Default)]
pub struct AccessoryNotifier {
    accessories: Vec<Accessory>,
}

impl AccessoryNotifier {
    /// Append an accessory; duplicates are allowed
    pub fn push(&mut self, accessory: Accessory) {
        self.accessories.push(accessory);
    }

    /// Number of registered accessories
    #[must_use]
    pub fn len(&self) -> usize {
        self.accessories.len()
    }

    /// Whether no accessories are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accessories.is_empty()
    }

    /// Broadcast `will_start`
    pub fn will_start(&self, request: &Request) {
        self.broadcast(Phase::WillStart, request);
    }

    /// Broadcast `will_stop`
    pub fn will_stop(&self, request: &Request) {
        self.broadcast(Phase::WillStop, request);
    }

    /// Broadcast `did_stop`
    pub fn did_stop(&self, request: &Request) {
        self.broadcast(Phase::DidStop, request);
    }

    fn broadcast(&self, phase: Phase, request: &Request) {
        for accessory in &self.accessories {
            let Some(hook) = phase.hook(accessory) else {
                continue;
            };
            if catch_unwind(AssertUnwindSafe(|| hook(request))).is_err() {
                warn!(
                    request_id = %request.id(),
                    accessory = %accessory.name,
                    phase = phase.label(),
                    "Accessory hook panicked"
                );
            }
        }
    }
}
