pub mod memory;
pub mod models;
pub mod repository;
pub mod store;

pub use memory::InMemoryCircleStore;
pub use repository::LedgerRepository;
pub use store::{CircleStore, MemberDirectory};
