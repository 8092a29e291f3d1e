mod tenant_environment;
mod tier_template;

pub use tenant_environment::*;
pub use tier_template::*;
