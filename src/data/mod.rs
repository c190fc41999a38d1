//! Input readers and persistence.

pub mod extractor {
    pub use crate::extractor::*;
}

pub mod documents {
    pub use crate::documents::*;
}

pub mod staging {
    pub use crate::staging::*;
}

pub mod db_storage {
    pub use crate::db_storage::*;
}

pub mod memory_store {
    pub use crate::memory_store::*;
}
