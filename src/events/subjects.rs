use std::fmt;

use serde::{Deserialize, Serialize};

/// Every subject services in the cluster publish on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subjects {
    #[serde(rename = "ticket:created")]
    TicketCreated,
}

impl Subjects {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Subjects::TicketCreated => "ticket:created",
        }
    }
}

impl fmt::Display for Subjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
