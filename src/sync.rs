//! Reconciles Rally work items with the cards already on a Trello board.
//!
//! Existing cards are read once per run into a [`CardSnapshot`] and passed
//! to every existence check. Cards created during the run are not added to
//! the snapshot, so two items that format to the same card name in one run
//! both get a card.

use anyhow::Result;

use crate::config::Settings;
use crate::model::board::{BoardList, CardSnapshot, NewCard};
use crate::model::work_item::{EntityKind, WorkItem};
use crate::providers::{self, BoardProvider, SourceProvider};
use crate::util::markdown::html_to_markdown;

/// Outcome of importing one collection of work items.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportReport {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
}

impl ImportReport {
    fn merge(&mut self, other: ImportReport) {
        self.created.extend(other.created);
        self.skipped.extend(other.skipped);
    }
}

pub fn card_name(item: &WorkItem) -> String {
    format!("{}: {}", item.formatted_id, item.name)
}

pub fn card_description(item: &WorkItem) -> String {
    let description = html_to_markdown(&item.description);
    let acceptance = html_to_markdown(&item.acceptance_criteria);
    format!(
        "[{}]: \n {} \n Acceptance Criteria: {}",
        format_estimate(item.plan_estimate),
        description,
        acceptance
    )
}

/// Whole estimates print without a fractional part; absent ones print empty.
fn format_estimate(estimate: Option<f64>) -> String {
    match estimate {
        Some(e) if e.fract() == 0.0 && e.abs() < 1e15 => format!("{}", e as i64),
        Some(e) => e.to_string(),
        None => String::new(),
    }
}

pub fn deep_link_url(base_url: &str, project_id: u64, kind: EntityKind, object_id: u64) -> String {
    format!(
        "{base_url}/#/{project_id}d/detail/{}/{object_id}",
        kind.route_token()
    )
}

/// Create a card on `list` for every item whose card name is not in
/// `existing`.
pub async fn import_work_items(
    board: &dyn BoardProvider,
    items: &[WorkItem],
    list: &BoardList,
    existing: &CardSnapshot,
    link_base: &str,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    // Every item in a run shares one project; it only feeds the link.
    let Some(project_id) = items.first().map(|i| i.project_id) else {
        return Ok(report);
    };

    for item in items {
        let name = card_name(item);
        if existing.contains(&name) {
            println!("Card '{name}' already exists");
            report.skipped.push(name);
            continue;
        }

        let new_card = NewCard {
            description: card_description(item),
            attachment_url: deep_link_url(link_base, project_id, item.kind, item.object_id),
            attachment_label: item.kind.attachment_label().to_string(),
            name,
        };
        println!("Creating card: {}", new_card.name);
        providers::create_card_with_attachment(board, &new_card, list).await?;
        report.created.push(new_card.name);
    }

    Ok(report)
}

/// One full import: fetch the iteration, resolve the target, create what is
/// missing.
pub async fn run(
    source: &dyn SourceProvider,
    board_provider: &dyn BoardProvider,
    settings: &Settings,
) -> Result<ImportReport> {
    let iteration = &settings.rally.iteration;
    log::debug!("importing from {} into {}", source.name(), board_provider.name());

    let stories = source.fetch_work_items(EntityKind::Story, iteration).await?;
    if stories.is_empty() {
        println!("No {} found for iteration '{iteration}'", EntityKind::Story.plural());
    }
    let defects = source.fetch_work_items(EntityKind::Defect, iteration).await?;
    if defects.is_empty() {
        println!("No {} found for iteration '{iteration}'", EntityKind::Defect.plural());
    }

    let board = providers::resolve_or_create_board(board_provider, &settings.trello.board).await?;
    let list =
        providers::resolve_or_create_list(board_provider, &settings.trello.list, &board).await?;
    println!("Importing to board '{}'", board.name);
    println!("Importing to list '{}'", list.name);

    let existing = providers::load_snapshot(board_provider, &board).await?;
    if existing.is_empty() {
        println!("No existing cards on board '{}'", board.name);
    }
    let link_base = &settings.rally.base_url;

    let mut report = ImportReport::default();
    if settings.rally.import_defects && !defects.is_empty() {
        report.merge(
            import_work_items(
                board_provider,
                &defects,
                &list,
                &existing,
                link_base,
            )
            .await?,
        );
    } else if !defects.is_empty() {
        log::info!("skipping {} defects, defect import is off", defects.len());
    }
    report.merge(
        import_work_items(
            board_provider,
            &stories,
            &list,
            &existing,
            link_base,
        )
        .await?,
    );

    Ok(report)
}
