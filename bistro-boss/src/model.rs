//! Document types stored in the four collections.
//!
//! Menu items and reviews are opaque: only `_id` is typed, everything else is
//! carried through as raw JSON. Users and cart items type the fields the
//! routes filter on (`email`, `role`) and flatten the rest.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::LazyLock;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// 12-byte document identifier rendered as 24 lowercase hex characters.
///
/// Layout: 4-byte big-endian unix seconds, 5 process-random bytes, 3-byte counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid object id: {0}")]
pub struct InvalidObjectId(pub String);

static PROCESS_UNIQUE: LazyLock<[u8; 5]> = LazyLock::new(|| {
    let random = uuid::Uuid::new_v4();
    let bytes = random.as_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]
});

static COUNTER: LazyLock<AtomicU32> = LazyLock::new(|| {
    let random = uuid::Uuid::new_v4();
    let bytes = random.as_bytes();
    AtomicU32::new(u32::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]))
});

impl ObjectId {
    pub fn new() -> Self {
        let seconds = u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut bytes = [0_u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn to_hex(self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = InvalidObjectId;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidObjectId(raw.to_string());
        if raw.len() != 24 || !raw.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let mut bytes = [0_u8; 12];
        for (slot, pair) in bytes.iter_mut().zip(raw.as_bytes().chunks_exact(2)) {
            let pair = std::str::from_utf8(pair).map_err(|_| invalid())?;
            *slot = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Access level stored on a user. Unknown strings are rejected on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Customer,
}

/// Common shape of everything kept in a collection.
pub trait Document: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> ObjectId;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", default)]
    pub id: ObjectId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }
}

impl Document for User {
    fn id(&self) -> ObjectId {
        self.id
    }
}

/// Body of `POST /users`. `role` and `_id` are never taken from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl NewUser {
    pub fn into_user(mut self) -> User {
        self.profile.remove("_id");
        self.profile.remove("role");
        User {
            id: ObjectId::new(),
            email: self.email,
            role: None,
            profile: self.profile,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    #[serde(rename = "_id", default)]
    pub id: ObjectId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document for MenuItem {
    fn id(&self) -> ObjectId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(rename = "_id", default)]
    pub id: ObjectId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document for Review {
    fn id(&self) -> ObjectId {
        self.id
    }
}

/// A cart line owned by `email`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    #[serde(rename = "_id", default)]
    pub id: ObjectId,
    pub email: String,
    #[serde(flatten)]
    pub item: Map<String, Value>,
}

impl Document for CartItem {
    fn id(&self) -> ObjectId {
        self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCartItem {
    pub email: String,
    #[serde(flatten)]
    pub item: Map<String, Value>,
}

impl NewCartItem {
    pub fn into_cart_item(mut self) -> CartItem {
        self.item.remove("_id");
        CartItem {
            id: ObjectId::new(),
            email: self.email,
            item: self.item,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::{CartItem, NewCartItem, NewUser, ObjectId, Role, User};

    #[test]
    fn object_id_parses_its_own_hex() {
        let id = ObjectId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(hex.parse::<ObjectId>(), Ok(id));
    }

    #[test]
    fn object_id_rejects_bad_input() {
        assert!("".parse::<ObjectId>().is_err());
        assert!("642c155b2c4774f05c36eeb".parse::<ObjectId>().is_err());
        assert!("zz2c155b2c4774f05c36eeb9".parse::<ObjectId>().is_err());
        assert!("642c155b2c4774f05c36eeb9aa".parse::<ObjectId>().is_err());
        assert!("+42c155b2c4774f05c36eeb9".parse::<ObjectId>().is_err());
    }

    #[test]
    fn object_ids_are_distinct() {
        let first = ObjectId::new();
        let second = ObjectId::new();
        assert_ne!(first, second);
    }

    #[test]
    fn menu_seed_keeps_existing_id() {
        let raw = json!({
            "_id": "642c155b2c4774f05c36eeb9",
            "name": "Haddock",
            "price": 14.7
        });
        let item: super::MenuItem = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.id.to_hex(), "642c155b2c4774f05c36eeb9");
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn new_user_drops_client_role_and_id() {
        let new_user: NewUser = serde_json::from_value(json!({
            "email": "a@b.com",
            "name": "Alice",
            "role": "admin",
            "_id": "642c155b2c4774f05c36eeb9"
        }))
        .unwrap();

        let user = new_user.into_user();
        assert_eq!(user.email, "a@b.com");
        assert_eq!(user.role, None);
        assert!(!user.profile.contains_key("role"));
        assert!(!user.profile.contains_key("_id"));
        assert_eq!(user.profile.get("name"), Some(&json!("Alice")));
    }

    #[test]
    fn user_rejects_unknown_role() {
        let result = serde_json::from_value::<User>(json!({
            "_id": "642c155b2c4774f05c36eeb9",
            "email": "a@b.com",
            "role": "superuser"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn user_role_serializes_lowercase() {
        let user = User {
            id: ObjectId::new(),
            email: String::from("a@b.com"),
            role: Some(Role::Admin),
            profile: serde_json::Map::new(),
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["role"], json!("admin"));
        assert!(user.is_admin());
    }

    #[test]
    fn cart_item_flattens_item_fields() {
        let new_item: NewCartItem = serde_json::from_value(json!({
            "email": "a@b.com",
            "menuItemId": "642c155b2c4774f05c36eeb9",
            "name": "Haddock",
            "price": 14.7
        }))
        .unwrap();
        let item: CartItem = new_item.into_cart_item();
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["email"], json!("a@b.com"));
        assert_eq!(value["name"], json!("Haddock"));
        assert_eq!(value["_id"], json!(item.id.to_hex()));
    }
}
