use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use armsledger_core::{Entity, ItemId, UserId, ValueObject};

/// Which inventory collection an entry lives in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Weapon,
    Ammunition,
    Equipment,
    Other,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Weapon,
        ItemKind::Ammunition,
        ItemKind::Equipment,
        ItemKind::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Weapon => "weapon",
            ItemKind::Ammunition => "ammunition",
            ItemKind::Equipment => "equipment",
            ItemKind::Other => "other",
        }
    }
}

impl core::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical condition of an inventory entry.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Serviceable,
    Unserviceable,
    UnderMaintenance,
    Missing,
}

/// Descriptive attributes of an item, per collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemDetails {
    Weapon {
        name: String,
        weapon_type: String,
        #[serde(default)]
        make: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        caliber: Option<String>,
        #[serde(default)]
        serial_numbers: Vec<String>,
    },
    Ammunition {
        name: String,
        caliber: String,
        #[serde(default)]
        ammunition_type: Option<String>,
        #[serde(default)]
        lot_number: Option<String>,
    },
    Equipment {
        name: String,
        #[serde(default)]
        equipment_type: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    Other {
        name: String,
        #[serde(default)]
        description: Option<String>,
    },
}

impl ItemDetails {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemDetails::Weapon { .. } => ItemKind::Weapon,
            ItemDetails::Ammunition { .. } => ItemKind::Ammunition,
            ItemDetails::Equipment { .. } => ItemKind::Equipment,
            ItemDetails::Other { .. } => ItemKind::Other,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ItemDetails::Weapon { name, .. }
            | ItemDetails::Ammunition { name, .. }
            | ItemDetails::Equipment { name, .. }
            | ItemDetails::Other { name, .. } => name,
        }
    }

    /// Free-text haystack used by listing search.
    pub fn search_text(&self) -> String {
        match self {
            ItemDetails::Weapon {
                name,
                weapon_type,
                make,
                model,
                caliber,
                serial_numbers,
            } => {
                let mut parts = vec![name.as_str(), weapon_type.as_str()];
                parts.extend(make.as_deref());
                parts.extend(model.as_deref());
                parts.extend(caliber.as_deref());
                parts.extend(serial_numbers.iter().map(String::as_str));
                parts.join(" ")
            }
            ItemDetails::Ammunition {
                name,
                caliber,
                ammunition_type,
                lot_number,
            } => {
                let mut parts = vec![name.as_str(), caliber.as_str()];
                parts.extend(ammunition_type.as_deref());
                parts.extend(lot_number.as_deref());
                parts.join(" ")
            }
            ItemDetails::Equipment {
                name,
                equipment_type,
                model,
            } => {
                let mut parts = vec![name.as_str()];
                parts.extend(equipment_type.as_deref());
                parts.extend(model.as_deref());
                parts.join(" ")
            }
            ItemDetails::Other { name, description } => {
                let mut parts = vec![name.as_str()];
                parts.extend(description.as_deref());
                parts.join(" ")
            }
        }
    }
}

/// One line of an armory's inventory.
///
/// Invariant (enforced by the `Armory` aggregate): `available_quantity <= quantity`.
/// `quantity - available_quantity` is the number currently out on distributions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub item_id: ItemId,
    pub details: ItemDetails,
    pub quantity: u32,
    pub available_quantity: u32,
    pub condition: Condition,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryEntry {
    pub fn kind(&self) -> ItemKind {
        self.details.kind()
    }

    /// Units currently held by officers.
    pub fn issued_quantity(&self) -> u32 {
        self.quantity.saturating_sub(self.available_quantity)
    }

    /// Copy the descriptive attributes out as an immutable snapshot.
    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            details: self.details.clone(),
            condition_at_issue: self.condition,
        }
    }
}

impl Entity for InventoryEntry {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.item_id
    }
}

/// An entry to be appended to an armory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInventoryEntry {
    pub item_id: ItemId,
    pub details: ItemDetails,
    pub quantity: u32,
    /// Defaults to `quantity` (nothing issued yet).
    #[serde(default)]
    pub available_quantity: Option<u32>,
    #[serde(default)]
    pub condition: Option<Condition>,
}

impl NewInventoryEntry {
    pub fn new(details: ItemDetails, quantity: u32) -> Self {
        Self {
            item_id: ItemId::new(),
            details,
            quantity,
            available_quantity: None,
            condition: None,
        }
    }

    pub fn into_entry(self, created_by: UserId, at: DateTime<Utc>) -> InventoryEntry {
        InventoryEntry {
            item_id: self.item_id,
            available_quantity: self.available_quantity.unwrap_or(self.quantity),
            details: self.details,
            quantity: self.quantity,
            condition: self.condition.unwrap_or_default(),
            created_by,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Entries to append, grouped by collection. Every group is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryBatch {
    #[serde(default)]
    pub weapons: Vec<NewInventoryEntry>,
    #[serde(default)]
    pub ammunition: Vec<NewInventoryEntry>,
    #[serde(default)]
    pub equipment: Vec<NewInventoryEntry>,
    #[serde(default)]
    pub other_items: Vec<NewInventoryEntry>,
}

impl InventoryBatch {
    pub fn is_empty(&self) -> bool {
        self.weapons.is_empty()
            && self.ammunition.is_empty()
            && self.equipment.is_empty()
            && self.other_items.is_empty()
    }

    pub fn groups(&self) -> [(ItemKind, &[NewInventoryEntry]); 4] {
        [
            (ItemKind::Weapon, &self.weapons),
            (ItemKind::Ammunition, &self.ammunition),
            (ItemKind::Equipment, &self.equipment),
            (ItemKind::Other, &self.other_items),
        ]
    }
}

/// Descriptive attributes frozen at issue time.
///
/// Copied by value out of the armory entry; editing the master item later
/// never changes a snapshot already stored on a distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub details: ItemDetails,
    pub condition_at_issue: Condition,
}

impl ItemSnapshot {
    pub fn kind(&self) -> ItemKind {
        self.details.kind()
    }
}

impl ValueObject for ItemSnapshot {}
