use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::BoardProvider;
use crate::config::TrelloSettings;
use crate::model::board::{Board, BoardList, Card};

pub struct TrelloProvider {
    base: String,
    api_key: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct Attachment {
    id: String,
}

impl TrelloProvider {
    pub fn new(settings: &TrelloSettings) -> Self {
        Self {
            base: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
            token: settings.token.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn auth_params(&self) -> [(&str, &str); 2] {
        [("key", &self.api_key), ("token", &self.token)]
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, fields: &str) -> Result<T> {
        let url = format!("{}/{path}", self.base);
        log::debug!("GET {url}");
        self.client
            .get(&url)
            .query(&self.auth_params())
            .query(&[("fields", fields)])
            .send()
            .await
            .with_context(|| format!("Trello GET {path} failed"))?
            .error_for_status()
            .with_context(|| format!("Trello GET {path} returned an error status"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse Trello {path} response"))
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        let url = format!("{}/{path}", self.base);
        log::debug!("POST {url}");
        self.client
            .post(&url)
            .query(&self.auth_params())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Trello POST {path} failed"))?
            .error_for_status()
            .with_context(|| format!("Trello POST {path} returned an error status"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse Trello {path} response"))
    }
}

#[async_trait]
impl BoardProvider for TrelloProvider {
    fn name(&self) -> &str {
        "Trello"
    }

    async fn list_boards(&self) -> Result<Vec<Board>> {
        self.get("members/me/boards", "id,name").await
    }

    async fn create_board(&self, name: &str) -> Result<Board> {
        self.post("boards", serde_json::json!({ "name": name }))
            .await
            .with_context(|| format!("Failed to create Trello board '{name}'"))
    }

    async fn list_lists(&self, board: &Board) -> Result<Vec<BoardList>> {
        self.get(&format!("boards/{}/lists", board.id), "id,name")
            .await
    }

    async fn create_list(&self, name: &str, board: &Board) -> Result<BoardList> {
        self.post(
            "lists",
            serde_json::json!({ "name": name, "idBoard": board.id }),
        )
        .await
        .with_context(|| format!("Failed to create Trello list '{name}'"))
    }

    async fn list_cards(&self, board: &Board) -> Result<Vec<Card>> {
        self.get(&format!("boards/{}/cards", board.id), "id,name,idList")
            .await
    }

    async fn create_card(&self, name: &str, description: &str, list: &BoardList) -> Result<Card> {
        self.post(
            "cards",
            serde_json::json!({ "name": name, "desc": description, "idList": list.id }),
        )
        .await
        .with_context(|| format!("Failed to create Trello card '{name}'"))
    }

    async fn add_attachment(&self, card: &Card, url: &str, label: &str) -> Result<()> {
        let attachment: Attachment = self
            .post(
                &format!("cards/{}/attachments", card.id),
                serde_json::json!({ "url": url, "name": label }),
            )
            .await
            .with_context(|| format!("Failed to attach link to card '{}'", card.name))?;
        log::debug!("attachment {} added to card {}", attachment.id, card.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> TrelloProvider {
        TrelloProvider::new(&TrelloSettings {
            base_url: server.uri(),
            api_key: "k".into(),
            token: "t".into(),
            board: "Sprint".into(),
            list: "To Do".into(),
        })
    }

    fn board() -> Board {
        Board {
            id: "b1".into(),
            name: "Sprint".into(),
        }
    }

    #[tokio::test]
    async fn lists_boards_with_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/members/me/boards"))
            .and(query_param("key", "k"))
            .and(query_param("token", "t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "b1", "name": "Sprint" },
                { "id": "b2", "name": "Backlog" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let boards = provider(&server).list_boards().await.unwrap();
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[1].name, "Backlog");
    }

    #[tokio::test]
    async fn creates_board_and_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/boards"))
            .and(body_json(json!({ "name": "Sprint" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": "b1", "name": "Sprint" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/lists"))
            .and(body_json(json!({ "name": "To Do", "idBoard": "b1" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": "l1", "name": "To Do" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let trello = provider(&server);
        let board = trello.create_board("Sprint").await.unwrap();
        let list = trello.create_list("To Do", &board).await.unwrap();
        assert_eq!(list.id, "l1");
    }

    #[tokio::test]
    async fn lists_cards_on_board() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/boards/b1/cards"))
            .and(query_param("fields", "id,name,idList"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "c1", "name": "US1: a", "idList": "l1" },
                { "id": "c2", "name": "US2: b", "idList": "l2" }
            ])))
            .mount(&server)
            .await;

        let cards = provider(&server).list_cards(&board()).await.unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[1].id_list.as_deref(), Some("l2"));
    }

    #[tokio::test]
    async fn creates_card_and_attachment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cards"))
            .and(body_json(json!({ "name": "US1: a", "desc": "d", "idList": "l1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "c9", "name": "US1: a", "desc": "d", "idList": "l1"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cards/c9/attachments"))
            .and(body_json(json!({ "url": "https://rally/x", "name": "Rally User Story" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "a1" })))
            .expect(1)
            .mount(&server)
            .await;

        let trello = provider(&server);
        let list = BoardList {
            id: "l1".into(),
            name: "To Do".into(),
        };
        let card = trello.create_card("US1: a", "d", &list).await.unwrap();
        trello
            .add_attachment(&card, "https://rally/x", "Rally User Story")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn error_status_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let err = provider(&server).list_boards().await.unwrap_err();
        assert!(err.to_string().contains("error status"));
    }
}
