// Domain-layer modules: normalization, resolution and enrichment
pub mod classifier {
    pub use crate::classifier::*;
}

pub mod identity {
    pub use crate::identity::*;
}

pub mod enricher {
    pub use crate::enricher::*;
}

pub mod migrator {
    pub use crate::migrator::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
