use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Kind of network object owning rows in the attribute tables.
///
/// Stored as text (`equipment_type` column), so the string form is part of the
/// persisted layout and must not change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Network,
    Substation,
    VoltageLevel,
    Load,
    Generator,
    Battery,
    ShuntCompensator,
    StaticVarCompensator,
    VscConverterStation,
    LccConverterStation,
    TwoWindingsTransformer,
    ThreeWindingsTransformer,
    Line,
    HvdcLine,
    DanglingLine,
    TieLine,
    Switch,
    BusbarSection,
    ConfiguredBus,
    Ground,
    Area,
}

/// Side of a two-terminal branch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TwoSides {
    One,
    Two,
}

/// Leg of a three-windings transformer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreeSides {
    One,
    Two,
    Three,
}

/// Reference to the terminal of a connectable, used by regulating points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalRef {
    pub connectable_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<ThreeSides>,
}

impl TerminalRef {
    pub fn new(connectable_id: impl Into<String>) -> Self {
        Self {
            connectable_id: connectable_id.into(),
            side: None,
        }
    }

    pub fn with_side(connectable_id: impl Into<String>, side: ThreeSides) -> Self {
        Self {
            connectable_id: connectable_id.into(),
            side: Some(side),
        }
    }
}
