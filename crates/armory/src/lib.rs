//! Armory registry domain (per-location inventory, custody).
//!
//! Pure business rules for armories: creation, additive inventory, stock
//! withdrawal/restock on behalf of distributions, administrative correction,
//! custodian handover and removal. No IO.

pub mod armory;
pub mod item;

pub use armory::{
    AppendInventory, Armory, ArmoryCommand, ArmoryCorrected, ArmoryCorrection, ArmoryCreated,
    ArmoryEvent, ArmoryProfile, ArmoryRemoved, ArmoryStatus, CorrectArmory, CreateArmory,
    Custodian, CustodianAssignment, CustodyHandedOver, HandOverCustody, HandoverKind,
    HandoverRecord, InventoryAppended, RemoveArmory, RestockItems, RestockLine, SecurityLevel,
    StockLine, StockRestocked, StockWithdrawn, WithdrawStock, execute,
};
pub use item::{
    Condition, InventoryBatch, InventoryEntry, ItemDetails, ItemKind, ItemSnapshot,
    NewInventoryEntry,
};
