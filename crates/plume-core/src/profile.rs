use serde::{Deserialize, Serialize};

/// Display metadata of an author, every field independently optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFields {
    pub display_name: Option<String>,
    pub verified_identifier: Option<String>,
    pub avatar_url: Option<String>,
    pub payment_address: Option<String>,
}

fn non_blank(map: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

impl ProfileFields {
    /// Parse the JSON content of a metadata record
    ///
    /// Unknown keys and non-string values are ignored; blank strings count as
    /// absent.
    pub fn from_metadata_json(content: &str) -> Result<Self, serde_json::Error> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(content)?;

        Ok(Self {
            display_name: non_blank(&map, "display_name").or_else(|| non_blank(&map, "name")),
            verified_identifier: non_blank(&map, "nip05"),
            avatar_url: non_blank(&map, "picture"),
            payment_address: non_blank(&map, "lud16").or_else(|| non_blank(&map, "lud06")),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.verified_identifier.is_none()
            && self.avatar_url.is_none()
            && self.payment_address.is_none()
    }

    /// Overwrite only the fields `newer` actually carries
    ///
    /// Returns `true` if anything changed.
    pub fn merge_from(&mut self, newer: &ProfileFields) -> bool {
        fn merge_field(dst: &mut Option<String>, src: &Option<String>) -> bool {
            match src {
                Some(v) if dst.as_ref() != Some(v) => {
                    *dst = Some(v.clone());
                    true
                }
                _ => false,
            }
        }

        let mut changed = merge_field(&mut self.display_name, &newer.display_name);
        changed |= merge_field(&mut self.verified_identifier, &newer.verified_identifier);
        changed |= merge_field(&mut self.avatar_url, &newer.avatar_url);
        changed |= merge_field(&mut self.payment_address, &newer.payment_address);
        changed
    }
}
