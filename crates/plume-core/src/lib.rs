//! Record model of the plume feed pipeline
//!
//! Records are immutable, content-addressed events. Everything derived from
//! them (reply structure, embedded references, profile fields) is computed
//! on demand and never stored back into the record.

pub mod macros;
pub mod profile;
pub mod record;
pub mod reference;
pub mod relations;

pub use self::profile::ProfileFields;
pub use self::record::{Record, RecordKind, Tag, Timestamp};
pub use self::reference::{DecodedReference, ReferenceToken, decode_reference};
pub use self::relations::ReplyFallback;

crate::array_type_define!(
    /// Content hash of a [`Record`], its primary key
    struct RecordId, 32
);
crate::array_type_impl_hex_str!(RecordId);
crate::array_type_impl_serde!(RecordId);

crate::array_type_define!(
    /// Public key of a record author
    struct AuthorId, 32
);
crate::array_type_impl_hex_str!(AuthorId);
crate::array_type_impl_serde!(AuthorId);

crate::array_type_define!(struct RecordSignature, 64);
crate::array_type_impl_hex_str!(RecordSignature);
crate::array_type_impl_serde!(RecordSignature);

crate::array_type_define!(
    /// First 8 bytes of an id, used in logs
    struct ShortId, 8
);
crate::array_type_impl_hex_str!(ShortId);

pub trait ToShort {
    type ShortId;
    fn to_short(self) -> Self::ShortId;
}

impl ToShort for RecordId {
    type ShortId = ShortId;

    fn to_short(self) -> Self::ShortId {
        ShortId(self.0[..8].try_into().expect("Can't fail"))
    }
}

impl ToShort for AuthorId {
    type ShortId = ShortId;

    fn to_short(self) -> Self::ShortId {
        ShortId(self.0[..8].try_into().expect("Can't fail"))
    }
}

impl From<RecordId> for [u8; 32] {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

impl From<AuthorId> for [u8; 32] {
    fn from(value: AuthorId) -> Self {
        value.0
    }
}
