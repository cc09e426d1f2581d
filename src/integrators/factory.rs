//! String-keyed integrator construction with alias support, mirroring
//! the registry pattern used for controller/dynamics factories
//! elsewhere in the kernel.

use super::adaptive::DormandPrince45;
use super::fixed_step::{BackwardEuler, ForwardEuler, Rk2, Rk4, Rk38};
use super::zoh::ZeroOrderHold;
use super::Integrator;
use crate::error::SimError;

/// Canonical registry entry: a display name plus the order it claims.
struct Entry {
    canonical: &'static str,
    order: u32,
    adaptive: bool,
    build: fn() -> Box<dyn Integrator>,
}

const REGISTRY: &[Entry] = &[
    Entry {
        canonical: "forward_euler",
        order: 1,
        adaptive: false,
        build: || Box::new(ForwardEuler::new()),
    },
    Entry {
        canonical: "backward_euler",
        order: 1,
        adaptive: false,
        build: || Box::new(BackwardEuler::new()),
    },
    Entry {
        canonical: "rk2",
        order: 2,
        adaptive: false,
        build: || Box::new(Rk2::new()),
    },
    Entry {
        canonical: "rk4",
        order: 4,
        adaptive: false,
        build: || Box::new(Rk4::new()),
    },
    Entry {
        canonical: "rk38",
        order: 4,
        adaptive: false,
        build: || Box::new(Rk38::new()),
    },
    Entry {
        canonical: "dormand_prince",
        order: 5,
        adaptive: true,
        build: || Box::new(DormandPrince45::new()),
    },
    Entry {
        canonical: "zoh",
        order: 4,
        adaptive: false,
        build: || Box::new(ZeroOrderHold::new()),
    },
];

/// Maps a normalized alias to the registry's canonical key.
/// `resolve_alias` lower-cases its input and replaces `-`/` ` with `_`
/// before matching, so `"RK-4"`, `"rk 4"`, and `"rk4"` all resolve the
/// same way. Built through the generic [`Integrator`] entry point,
/// `zoh`/`zero_order_hold` falls back to RK4 for non-LTI plants;
/// callers with a `LinearTimeInvariant` plant get the exact
/// discretization via [`ZeroOrderHold::integrate_lti`] directly.
fn resolve_alias(key: &str) -> Option<&'static str> {
    let normalized = key.to_lowercase().replace(['-', ' '], "_");
    match normalized.as_str() {
        "euler" | "forward_euler" => Some("forward_euler"),
        "backward_euler" | "implicit_euler" => Some("backward_euler"),
        "rk2" | "midpoint" => Some("rk2"),
        "rk4" | "runge_kutta_4" => Some("rk4"),
        "rk38" | "rk3/8" | "runge_kutta_38" => Some("rk38"),
        "dp45" | "dormand_prince" | "adaptive_rk" | "rk45" => Some("dormand_prince"),
        "zoh" | "zero_order_hold" => Some("zoh"),
        _ => None,
    }
}

/// Metadata returned by [`IntegratorFactory::describe`].
pub struct IntegratorInfo {
    pub key: &'static str,
    pub order: u32,
    pub adaptive: bool,
}

/// Builds integrators by string key, with a small user-registered
/// extension table layered on top of the built-in set.
#[derive(Default)]
pub struct IntegratorFactory {
    extra: Vec<(String, fn() -> Box<dyn Integrator>)>,
}

impl IntegratorFactory {
    pub fn new() -> Self {
        IntegratorFactory { extra: Vec::new() }
    }

    /// Registers an additional key not in the built-in set. Built-in
    /// keys cannot be overridden.
    pub fn register_integrator(
        &mut self,
        key: impl Into<String>,
        build: fn() -> Box<dyn Integrator>,
    ) -> Result<(), SimError> {
        let key = key.into();
        if resolve_alias(&key).is_some() {
            return Err(SimError::invalid_input(format!(
                "cannot override built-in integrator key '{key}'"
            )));
        }
        self.extra.push((key, build));
        Ok(())
    }

    pub fn create(&self, key: &str) -> Result<Box<dyn Integrator>, SimError> {
        if let Some(canonical) = resolve_alias(key) {
            let entry = REGISTRY
                .iter()
                .find(|e| e.canonical == canonical)
                .expect("resolve_alias only returns canonical keys present in REGISTRY");
            return Ok((entry.build)());
        }
        if let Some((_, build)) = self.extra.iter().find(|(k, _)| k == key) {
            return Ok(build());
        }
        Err(SimError::invalid_input(format!(
            "unknown integrator '{key}', available: {}",
            self.list_available().join(", ")
        )))
    }

    pub fn create_default(&self) -> Box<dyn Integrator> {
        Box::new(Rk4::new())
    }

    pub fn list_available(&self) -> Vec<&str> {
        REGISTRY
            .iter()
            .map(|e| e.canonical)
            .chain(self.extra.iter().map(|(k, _)| k.as_str()))
            .collect()
    }

    pub fn describe(&self, key: &str) -> Result<IntegratorInfo, SimError> {
        let canonical = resolve_alias(key).ok_or_else(|| {
            SimError::invalid_input(format!(
                "unknown integrator '{key}', available: {}",
                self.list_available().join(", ")
            ))
        })?;
        let entry = REGISTRY
            .iter()
            .find(|e| e.canonical == canonical)
            .expect("resolve_alias only returns canonical keys present in REGISTRY");
        Ok(IntegratorInfo {
            key: entry.canonical,
            order: entry.order,
            adaptive: entry.adaptive,
        })
    }
}
