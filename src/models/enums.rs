use crate::db::DatabaseError;

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Serde goes through the same strings, so stored values and the
/// wire format never drift apart.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

str_enum!(Role {
    Admin => "Admin",
    Doctor => "Doctor",
    Patient => "Patient",
});

str_enum!(MessageKind {
    Text => "text",
    Image => "image",
    Audio => "audio",
});

impl Default for MessageKind {
    fn default() -> Self {
        Self::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_round_trip() {
        for role in [Role::Admin, Role::Doctor, Role::Patient] {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), role);
        }
    }

    #[test]
    fn invalid_role_errors() {
        let err = Role::from_str("Nurse").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }

    #[test]
    fn message_kind_serializes_lowercase() {
        let json = serde_json::to_string(&MessageKind::Audio).unwrap();
        assert_eq!(json, "\"audio\"");
        let kind: MessageKind = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(kind, MessageKind::Image);
        assert!(serde_json::from_str::<MessageKind>("\"video\"").is_err());
    }
}
