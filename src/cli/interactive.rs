//! Line-oriented type-ahead session: every line is a new query, debounced
//! before it reaches the search coordinator.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::entities::comparison::ComparisonSet;
use crate::entities::drug::DrugDirectory;
use crate::entities::name_search::{NameSearch, NameSearchClient};
use crate::entities::opportunity::{FilterState, OpportunityCatalog, OpportunityRecord};
use crate::entities::search::{Resolution, SearchCoordinator};
use crate::render;
use crate::utils::debounce::Debouncer;

const HELP: &str = "Type a drug name to search. `:N` selects result N, `:c N` toggles opportunity N \
of the selected drug into a comparison, `:x` leaves the comparison, `:q` quits, `:help` shows this.\n";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Query(String),
    Select(usize),
    Compare(usize),
    ExitCompare,
    Help,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(command) = line.trim().strip_prefix(':') else {
        return Input::Query(line.to_string());
    };
    match command.trim() {
        "q" | "quit" => Input::Quit,
        "help" | "h" | "?" => Input::Help,
        "x" => Input::ExitCompare,
        other => {
            let (compare, number) = match other.strip_prefix('c') {
                Some(rest) => (true, rest.trim()),
                None => (false, other),
            };
            match number.parse::<usize>() {
                Ok(n) if n > 0 && compare => Input::Compare(n - 1),
                Ok(n) if n > 0 => Input::Select(n - 1),
                _ => Input::Unknown(other.to_string()),
            }
        }
    }
}

struct Session<W> {
    directory: Arc<DrugDirectory>,
    catalog: OpportunityCatalog,
    coordinator: SearchCoordinator,
    /// The selected drug and its opportunities, in the order they were listed.
    shown: Option<(String, Vec<OpportunityRecord>)>,
    comparison: ComparisonSet,
    out: W,
    json: bool,
}

impl<W: AsyncWrite + Unpin> Session<W> {
    async fn write(&mut self, text: &str) -> anyhow::Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        if !text.ends_with('\n') {
            self.out.write_all(b"\n").await?;
        }
        self.out.flush().await?;
        Ok(())
    }

    async fn show_state(&mut self) -> anyhow::Result<()> {
        let text = if self.json {
            render::json::to_pretty(self.coordinator.state())?
        } else {
            render::markdown::drug_search_markdown(self.coordinator.state())?
        };
        self.write(&text).await
    }

    async fn select(&mut self, index: usize) -> anyhow::Result<()> {
        let Some(choice) = self.coordinator.choice(index).map(str::to_string) else {
            return self
                .write(&format!("No result {}. {HELP}", index + 1))
                .await;
        };
        let name = self.coordinator.select(&choice);
        let Some(record) = self.directory.lookup(&name) else {
            self.shown = None;
            self.comparison.clear();
            return self
                .write(&format!(
                    "# {name}\n\nNot in the bundled directory. Live evidence: repurpose analyze \"{name}\""
                ))
                .await;
        };
        let opportunities = self
            .catalog
            .get_opportunities(&record.name, &FilterState::default());
        let text = if self.json {
            render::json::to_pretty(&super::DrugView {
                drug: record,
                opportunities: opportunities.clone(),
            })?
        } else {
            render::markdown::drug_markdown(record, &opportunities)?
        };
        if self.shown.as_ref().map(|(drug, _)| drug) != Some(&record.name) {
            self.comparison.clear();
        }
        self.shown = Some((record.name.clone(), opportunities));
        self.write(&text).await
    }

    async fn toggle_compare(&mut self, index: usize) -> anyhow::Result<()> {
        let picked = self.shown.as_ref().and_then(|(drug, opportunities)| {
            Some((drug.clone(), opportunities.get(index)?.clone()))
        });
        let Some((drug, record)) = picked else {
            return self
                .write(&format!(
                    "No opportunity {} for the selected drug. {HELP}",
                    index + 1
                ))
                .await;
        };
        let outcome = self.comparison.toggle(&record);
        let text = if self.json {
            render::json::to_pretty(&super::ComparisonView {
                drug: &drug,
                items: self.comparison.items(),
                rows: self.comparison.rows(),
                skipped: &[],
                limit_reached: outcome.limit_reached,
            })?
        } else {
            render::markdown::comparison_markdown(
                &drug,
                &self.comparison,
                &[],
                outcome.limit_reached,
            )?
        };
        self.write(&text).await
    }

    async fn exit_compare(&mut self) -> anyhow::Result<()> {
        if self.comparison.is_empty() {
            return self.write("No comparison in progress.").await;
        }
        self.comparison.clear();
        self.write("Comparison cleared.").await
    }
}

/// Drives the session until `:q` or end of input.
pub(crate) async fn drive<R, W>(
    input: R,
    out: W,
    directory: Arc<DrugDirectory>,
    catalog: OpportunityCatalog,
    remote: Arc<dyn NameSearch>,
    debounce: Duration,
    json: bool,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = Session {
        coordinator: SearchCoordinator::new(Arc::clone(&directory), remote),
        shown: None,
        comparison: ComparisonSet::new(),
        directory,
        catalog,
        out,
        json,
    };
    let (mut debouncer, mut queries) = Debouncer::new(debounce);
    let mut lines = input.lines();
    let mut pending: Option<String> = None;

    session.write(HELP).await?;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line) {
                    Input::Query(query) => {
                        pending = Some(query.clone());
                        debouncer.push(query);
                    }
                    Input::Select(index) => {
                        debouncer.cancel();
                        while queries.try_recv().is_ok() {}
                        pending = None;
                        session.select(index).await?;
                    }
                    Input::Compare(index) => session.toggle_compare(index).await?,
                    Input::ExitCompare => session.exit_compare().await?,
                    Input::Help => session.write(HELP).await?,
                    Input::Quit => return Ok(()),
                    Input::Unknown(cmd) => {
                        session.write(&format!("Unknown command ':{cmd}'. {HELP}")).await?;
                    }
                }
            }
            Some(query) = queries.recv() => {
                debug!(query = %query, "Debounced query");
                pending = None;
                session.coordinator.on_query_changed(&query);
                session.show_state().await?;
            }
            Some(answer) = session.coordinator.next_resolution() => {
                if session.coordinator.apply_resolution(answer) == Resolution::Published {
                    session.show_state().await?;
                }
            }
        }
    }

    // End of input: search the query still waiting on the debounce timer, if
    // any, then wait for the current query to resolve.
    debouncer.cancel();
    if let Some(query) = pending {
        session.coordinator.on_query_changed(&query);
    }
    session.coordinator.settle().await;
    if !session.coordinator.state().query.is_empty() {
        session.show_state().await?;
    }
    Ok(())
}

pub(crate) async fn run(debounce: Duration, json: bool) -> anyhow::Result<String> {
    let directory = Arc::new(DrugDirectory::bundled()?);
    let catalog = OpportunityCatalog::bundled()?;
    let remote: Arc<dyn NameSearch> = Arc::new(NameSearchClient::new()?);
    drive(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        directory,
        catalog,
        remote,
        debounce,
        json,
    )
    .await?;
    Ok(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::entities::name_search::RemoteNameMatch;

    struct NoRemote;

    #[async_trait]
    impl NameSearch for NoRemote {
        async fn search(&self, _query: &str) -> Vec<RemoteNameMatch> {
            Vec::new()
        }
    }

    #[test]
    fn parse_input_recognises_commands() {
        assert_eq!(parse_input("metformin\n"), Input::Query("metformin".into()));
        assert_eq!(parse_input(":2"), Input::Select(1));
        assert_eq!(parse_input(" :q "), Input::Quit);
        assert_eq!(parse_input(":help"), Input::Help);
        assert_eq!(parse_input(":0"), Input::Unknown("0".into()));
        assert_eq!(parse_input(":c 2"), Input::Compare(1));
        assert_eq!(parse_input(":c3"), Input::Compare(2));
        assert_eq!(parse_input(":x"), Input::ExitCompare);
        assert_eq!(parse_input(":c"), Input::Unknown("c".into()));
    }

    /// Feeds `steps` to a running session, pausing after each chunk, and
    /// returns everything the session wrote.
    async fn scripted_session(steps: &[&str]) -> String {
        use tokio::io::AsyncReadExt;

        let (mut keys, input) = tokio::io::duplex(1 << 16);
        let (out, mut screen) = tokio::io::duplex(1 << 20);
        let session = tokio::spawn(drive(
            BufReader::new(input),
            out,
            Arc::new(DrugDirectory::bundled().unwrap()),
            OpportunityCatalog::bundled().unwrap(),
            Arc::new(NoRemote),
            Duration::from_millis(10),
            false,
        ));
        for step in steps {
            keys.write_all(step.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        session.await.unwrap().unwrap();

        let mut text = String::new();
        screen.read_to_string(&mut text).await.unwrap();
        text
    }

    #[tokio::test(start_paused = true)]
    async fn comparison_toggles_and_clears_within_selected_drug() {
        let text = scripted_session(&[
            "metformin\n",
            ":1\n",
            ":c 1\n",
            ":c 2\n",
            ":x\n",
            ":x\n",
            ":q\n",
        ])
        .await;

        assert!(text.contains("# Metformin"));
        assert!(text.contains("1. Cancer Prevention"));
        assert!(text.contains("Select at least 2 opportunities to compare (1 selected)"));
        assert!(text.contains("| Metric | Cancer Prevention |"));
        assert!(text.contains("Comparison cleared."));
        assert!(text.contains("No comparison in progress."));
    }

    #[tokio::test(start_paused = true)]
    async fn compare_needs_a_selected_drug() {
        let text = scripted_session(&[":c 1\n", ":q\n"]).await;
        assert!(text.contains("No opportunity 1 for the selected drug."));
    }

    #[tokio::test(start_paused = true)]
    async fn selection_discards_query_typed_just_before() {
        let text = scripted_session(&["metformin\n", "aspirin\n:1\n", ":q\n"]).await;

        assert!(text.contains("# Drug search: metformin"));
        assert!(text.contains("# Metformin"));
        assert!(!text.contains("# Drug search: aspirin"));
    }

    #[tokio::test]
    async fn quit_stops_before_debounced_query() {
        let input: &[u8] = b"metformin\n:q\n";
        let mut out: Vec<u8> = Vec::new();
        drive(
            input,
            &mut out,
            Arc::new(DrugDirectory::bundled().unwrap()),
            OpportunityCatalog::bundled().unwrap(),
            Arc::new(NoRemote),
            Duration::from_secs(60),
            false,
        )
        .await
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Type a drug name"));
        assert!(!text.contains("# Drug search"));
    }

    #[tokio::test]
    async fn unknown_selection_reports_missing_result() {
        let input: &[u8] = b":3\n:q\n";
        let mut out: Vec<u8> = Vec::new();
        drive(
            input,
            &mut out,
            Arc::new(DrugDirectory::bundled().unwrap()),
            OpportunityCatalog::bundled().unwrap(),
            Arc::new(NoRemote),
            Duration::from_millis(10),
            false,
        )
        .await
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("No result 3."));
    }

    #[tokio::test]
    async fn end_of_input_searches_pending_query() {
        let input: &[u8] = b"metformin\n";
        let mut out: Vec<u8> = Vec::new();
        drive(
            input,
            &mut out,
            Arc::new(DrugDirectory::bundled().unwrap()),
            OpportunityCatalog::bundled().unwrap(),
            Arc::new(NoRemote),
            Duration::from_secs(60),
            false,
        )
        .await
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("# Drug search: metformin"));
        assert!(text.contains("| 1 | Metformin | Glucophage |"));
        assert!(text.contains("No RxNorm matches."));
    }
}
