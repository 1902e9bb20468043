use serde::{Deserialize, Serialize};

/// Property naming convention between client and server names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NamingConvention {
    /// Names are identical on both sides.
    #[default]
    None,
    /// Server `PascalCase` names map to client `camelCase` names.
    CamelCase,
}

impl NamingConvention {
    #[must_use]
    pub fn server_to_client(self, name: &str) -> String {
        match self {
            Self::None => name.to_owned(),
            Self::CamelCase => with_first_char(name, char::to_ascii_lowercase),
        }
    }

    #[must_use]
    pub fn client_to_server(self, name: &str) -> String {
        match self {
            Self::None => name.to_owned(),
            Self::CamelCase => with_first_char(name, char::to_ascii_uppercase),
        }
    }

    /// Whether `name` survives a client → server → client trip unchanged.
    #[must_use]
    pub fn round_trips(self, name: &str) -> bool {
        self.server_to_client(&self.client_to_server(name)) == name
    }
}

fn with_first_char(name: &str, f: fn(&char) -> char) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(name.len());
            out.push(f(&first));
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}
