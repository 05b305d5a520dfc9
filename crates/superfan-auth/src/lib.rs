/// SUPERFAN AUTH
///
/// Who is calling and what they may do:
/// - Bearer tokens are HS256 JWTs whose `sub` is the user id
/// - Club admin rights come from the database, never from the token
/// - The admin bypass used in local development is refused in production

pub mod error;
pub mod policy;
pub mod token;

pub use error::AuthError;
pub use policy::{AdminPolicy, Environment};
pub use token::{parse_bearer, Claims, JwtVerifier, TokenVerifier};
