// Domain-layer services and shared errors/models
pub mod installments {
    pub use crate::installments::*;
}

pub mod payments {
    pub use crate::payments::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
