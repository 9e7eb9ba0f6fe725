pub mod rally;
pub mod trello;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::board::{Board, BoardList, Card, CardSnapshot, NewCard};
use crate::model::work_item::{EntityKind, WorkItem};

/// Where work items come from.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    fn name(&self) -> &str;
    /// Items of `kind` scheduled in the named iteration, newest id first.
    async fn fetch_work_items(&self, kind: EntityKind, iteration: &str) -> Result<Vec<WorkItem>>;
}

/// Where cards get created.
#[async_trait]
pub trait BoardProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn list_boards(&self) -> Result<Vec<Board>>;
    async fn create_board(&self, name: &str) -> Result<Board>;
    async fn list_lists(&self, board: &Board) -> Result<Vec<BoardList>>;
    async fn create_list(&self, name: &str, board: &Board) -> Result<BoardList>;
    /// All cards on the board, whatever list they are in.
    async fn list_cards(&self, board: &Board) -> Result<Vec<Card>>;
    async fn create_card(&self, name: &str, description: &str, list: &BoardList) -> Result<Card>;
    async fn add_attachment(&self, card: &Card, url: &str, label: &str) -> Result<()>;
}

/// Find a board by exact name, creating it if none matches.
pub async fn resolve_or_create_board(provider: &dyn BoardProvider, name: &str) -> Result<Board> {
    let boards = provider.list_boards().await?;
    if let Some(board) = boards.into_iter().find(|b| b.name == name) {
        return Ok(board);
    }
    println!("Creating board '{name}'");
    provider.create_board(name).await
}

/// Find a list on `board` by exact name, creating it if none matches.
pub async fn resolve_or_create_list(
    provider: &dyn BoardProvider,
    name: &str,
    board: &Board,
) -> Result<BoardList> {
    let lists = provider.list_lists(board).await?;
    if let Some(list) = lists.into_iter().find(|l| l.name == name) {
        return Ok(list);
    }
    println!("Creating list '{name}'");
    provider.create_list(name, board).await
}

pub async fn load_snapshot(provider: &dyn BoardProvider, board: &Board) -> Result<CardSnapshot> {
    let snapshot = CardSnapshot::new(provider.list_cards(board).await?);
    log::debug!("{} existing cards on board '{}'", snapshot.len(), board.name);
    Ok(snapshot)
}

/// Create the card, then attach the link back to the source item.
///
/// The two calls are not atomic: if attaching fails the card stays behind
/// without its link.
pub async fn create_card_with_attachment(
    provider: &dyn BoardProvider,
    card: &NewCard,
    list: &BoardList,
) -> Result<Card> {
    let created = provider
        .create_card(&card.name, &card.description, list)
        .await?;
    log::debug!("created card {} in list {:?}", created.id, created.id_list);
    provider
        .add_attachment(&created, &card.attachment_url, &card.attachment_label)
        .await?;
    Ok(created)
}
