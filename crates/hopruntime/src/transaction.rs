use uuid::Uuid;

/// Hands out transaction group ids for runs using unique connections
pub trait TransactionGroupAllocator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Allocates random v4 UUIDs
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidTransactionAllocator;

impl TransactionGroupAllocator for UuidTransactionAllocator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
