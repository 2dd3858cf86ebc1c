use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Attribute family: one table of per-equipment rows.
///
/// `Equipment` is the core family holding each equipment's own record; its
/// tombstones are the whole-equipment tombstones that hide every other family.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FamilyKind {
    Equipment,
    TapChangerStep,
    OperationalLimitsGroup,
    ReactiveCapabilityCurvePoint,
    RegulatingPoint,
    AreaBoundary,
    Extension,
}

impl FamilyKind {
    /// Backing table of the family.
    pub fn table_name(self) -> &'static str {
        match self {
            FamilyKind::Equipment => "equipment",
            FamilyKind::TapChangerStep => "tap_changer_step",
            FamilyKind::OperationalLimitsGroup => "operational_limits_group",
            FamilyKind::ReactiveCapabilityCurvePoint => "reactive_capability_curve_point",
            FamilyKind::RegulatingPoint => "regulating_point",
            FamilyKind::AreaBoundary => "area_boundary",
            FamilyKind::Extension => "extension",
        }
    }

    pub fn is_core(self) -> bool {
        self == FamilyKind::Equipment
    }
}
