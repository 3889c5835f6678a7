#![doc = include_str!("../README.md")]

pub mod frame;
pub mod probe;

pub use frame::{EthernetHeader, IpProtocol, Ipv4Header};
pub use probe::{build_probe, decode_timestamp, encode_timestamp, parse_probe, ProbeKind};

/// EtherType of IPv4 frames, matched by the capture flow on every switch
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// Length of the timestamp carried in the IPv4 options of a probe
pub const IPV4_OPTIONS_LEN: usize = 8;

/// Time-to-live of every probe; probes never cross more than one link
pub const PROBE_TTL: u8 = 1;

/// Derive To/From with an added "Unknown" variant catch-all for converting
/// from numerical values that do not match a valid variant in order to
/// avoid either panicking or cumbersome error handling.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a variant
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}
