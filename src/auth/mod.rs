//! Bearer-token authentication for protected FHIR resources.

mod error;
pub mod gate;
pub mod key_resolver;
pub mod validator;

pub use error::{AuthError, KeyResolutionError};
pub use gate::{AuthGate, DEFAULT_PUBLIC_PATHS, Passage, auth_middleware};
pub use key_resolver::{HttpKeySetSource, KeyResolver, KeySetSource, SigningKey};
pub use validator::{TokenValidator, VerifiedClaims};
