// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

pub mod installment_handler {
    pub use crate::installment_handler::*;
}

pub mod routes {
    pub use crate::routes::*;
}
