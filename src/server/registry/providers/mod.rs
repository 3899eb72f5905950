pub mod cached;
pub mod static_credentials;

#[cfg(feature = "aws")]
pub mod ecr;

pub use cached::CachingCredentialsProvider;
pub use static_credentials::StaticCredentialsProvider;
