//! Payloads and sub-keys of the per-equipment attribute families.
//!
//! Each family stores rows keyed by the owning equipment plus a family
//! specific sub-key; the types here are those sub-keys and the row payloads.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

use super::{TerminalRef, ThreeSides, TwoSides};

// ============================================================================
// Tap changers
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TapChangerType {
    Ratio,
    Phase,
}

/// Locates one step of one tap changer of a transformer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TapChangerStepKey {
    pub tap_changer_type: TapChangerType,
    /// Leg for three-windings transformers, `None` otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<ThreeSides>,
    pub index: i32,
}

impl TapChangerStepKey {
    pub fn ratio(index: i32) -> Self {
        Self {
            tap_changer_type: TapChangerType::Ratio,
            side: None,
            index,
        }
    }

    pub fn phase(index: i32) -> Self {
        Self {
            tap_changer_type: TapChangerType::Phase,
            side: None,
            index,
        }
    }

    pub fn on_side(mut self, side: ThreeSides) -> Self {
        self.side = Some(side);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapChangerStep {
    pub rho: f64,
    pub r: f64,
    pub x: f64,
    pub g: f64,
    pub b: f64,
    /// Phase shift in degrees, phase tap changers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
}

// ============================================================================
// Operational limits
// ============================================================================

/// Locates one operational-limits group on one side of a branch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LimitsGroupKey {
    pub side: ThreeSides,
    pub group_id: String,
}

impl LimitsGroupKey {
    pub fn new(side: ThreeSides, group_id: impl Into<String>) -> Self {
        Self {
            side,
            group_id: group_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporaryLimit {
    pub name: String,
    pub value: f64,
    /// Seconds the overload may last.
    pub acceptable_duration: i32,
    #[serde(default)]
    pub fictitious: bool,
}

/// Permanent limit plus temporary limits keyed by acceptable duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingLimits {
    pub permanent_limit: f64,
    #[serde(default)]
    pub temporary_limits: BTreeMap<i32, TemporaryLimit>,
}

impl LoadingLimits {
    pub fn permanent(limit: f64) -> Self {
        Self {
            permanent_limit: limit,
            temporary_limits: BTreeMap::new(),
        }
    }

    pub fn with_temporary(mut self, limit: TemporaryLimit) -> Self {
        self.temporary_limits.insert(limit.acceptable_duration, limit);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalLimitsGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_limits: Option<LoadingLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_power_limits: Option<LoadingLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparent_power_limits: Option<LoadingLimits>,
}

// ============================================================================
// Reactive capability curves
// ============================================================================

/// Curve points are indexed by their active power.
pub type CurvePointKey = OrderedFloat<f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactiveCapabilityCurvePoint {
    pub p: f64,
    pub min_q: f64,
    pub max_q: f64,
}

impl ReactiveCapabilityCurvePoint {
    pub fn key(&self) -> CurvePointKey {
        OrderedFloat(self.p)
    }
}

// ============================================================================
// Regulating points
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RegulatingPointKind {
    /// Voltage or reactive regulation of the equipment itself.
    Main,
    RatioTapChanger,
    PhaseTapChanger,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegulatingPointKey {
    pub kind: RegulatingPointKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<ThreeSides>,
}

impl RegulatingPointKey {
    pub fn main() -> Self {
        Self {
            kind: RegulatingPointKind::Main,
            side: None,
        }
    }

    pub fn tap_changer(kind: RegulatingPointKind, side: Option<ThreeSides>) -> Self {
        Self { kind, side }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatingPoint {
    pub local_terminal: TerminalRef,
    /// Remote terminal whose voltage/flow is regulated; local when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regulating_terminal: Option<TerminalRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regulation_mode: Option<String>,
    #[serde(default)]
    pub regulating: bool,
}

impl RegulatingPoint {
    /// Id of the equipment actually being regulated.
    pub fn regulated_equipment_id(&self) -> &str {
        self.regulating_terminal
            .as_ref()
            .unwrap_or(&self.local_terminal)
            .connectable_id
            .as_str()
    }
}

// ============================================================================
// Area boundaries
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AreaBoundaryKey {
    /// Dangling line or branch carrying the boundary.
    pub element_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<TwoSides>,
}

impl AreaBoundaryKey {
    pub fn dangling_line(element_id: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            side: None,
        }
    }

    pub fn terminal(element_id: impl Into<String>, side: TwoSides) -> Self {
        Self {
            element_id: element_id.into(),
            side: Some(side),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaBoundary {
    pub ac: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regulated_equipment_defaults_to_local_terminal() {
        let local = RegulatingPoint {
            local_terminal: TerminalRef::new("GEN"),
            regulating_terminal: None,
            regulation_mode: Some("VOLTAGE".to_string()),
            regulating: true,
        };
        assert_eq!(local.regulated_equipment_id(), "GEN");

        let remote = RegulatingPoint {
            regulating_terminal: Some(TerminalRef::new("LOAD")),
            ..local
        };
        assert_eq!(remote.regulated_equipment_id(), "LOAD");
    }

    #[test]
    fn test_temporary_limits_keyed_by_duration() {
        let limits = LoadingLimits::permanent(1000.0)
            .with_temporary(TemporaryLimit {
                name: "TL20".to_string(),
                value: 1400.0,
                acceptable_duration: 1200,
                fictitious: false,
            })
            .with_temporary(TemporaryLimit {
                name: "TL1".to_string(),
                value: 1800.0,
                acceptable_duration: 60,
                fictitious: false,
            });
        let durations: Vec<i32> = limits.temporary_limits.keys().copied().collect();
        assert_eq!(durations, vec![60, 1200]);

        let json = serde_json::to_value(&limits).unwrap();
        let back: LoadingLimits = serde_json::from_value(json).unwrap();
        assert_eq!(back, limits);
    }

    #[test]
    fn test_curve_points_order_by_active_power() {
        let a = ReactiveCapabilityCurvePoint { p: -10.0, min_q: -5.0, max_q: 5.0 };
        let b = ReactiveCapabilityCurvePoint { p: 20.0, min_q: -3.0, max_q: 3.0 };
        assert!(a.key() < b.key());
    }
}
