pub use cidr::IpCidr;

mod set;

pub use set::{parse_prefix, CidrSet, PrefixParseError};
