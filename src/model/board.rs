use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Board {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BoardList {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub name: String,
    pub id_list: Option<String>,
}

/// Everything needed to create one card and its link back to the source item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCard {
    pub name: String,
    pub description: String,
    pub attachment_url: String,
    pub attachment_label: String,
}

/// The cards that were on the board when the run started.
///
/// Fetched once and never refreshed, so cards created during the run are
/// not visible to later existence checks.
#[derive(Debug, Clone, Default)]
pub struct CardSnapshot {
    cards: Vec<Card>,
}

impl CardSnapshot {
    pub fn new(cards: Vec<Card>) -> Self {
        Self { cards }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cards.iter().any(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}
