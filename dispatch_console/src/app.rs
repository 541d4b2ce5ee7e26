use color_eyre::Result;
use dispatch_core::{
    ConflictDecision, DispatchEngine, Focus, ReconcileOutcome, Report, ReportSink, StateCache,
    Submission,
};
use dispatch_runtime::{resolve_unit_exact, DirectAction, UnitAliasTable, UnitId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Prints every report on its own line.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReportSink;

impl ReportSink for StdoutReportSink {
    fn report(&self, report: Report) {
        println!("{report}");
    }
}

pub struct ConsoleApp {
    engine: DispatchEngine,
    triggers: mpsc::Sender<()>,
}

impl ConsoleApp {
    pub fn new(engine: DispatchEngine, triggers: mpsc::Sender<()>) -> Self {
        Self { engine, triggers }
    }

    pub async fn run(mut self) -> Result<()> {
        println!("dispatch console ready; HELP for commands, :q to quit");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(meta) = line.strip_prefix(':') {
                if !self.handle_meta(meta).await {
                    break;
                }
                continue;
            }
            // Failures are already reported through the sink.
            if let Ok(submission) = self.engine.submit_line(line).await {
                self.show(submission);
            }
        }
        self.engine.save_store();
        info!("Operator session closed");
        Ok(())
    }

    /// Returns false when the operator asked to quit.
    async fn handle_meta(&mut self, meta: &str) -> bool {
        let mut parts = meta.split_whitespace();
        let verb = parts.next().unwrap_or_default().to_ascii_lowercase();
        let argument = parts.collect::<Vec<_>>().join(" ");
        debug!(verb = %verb, "console.meta");
        match verb.as_str() {
            "q" | "quit" => return false,
            "fg" => self.engine.set_focus(Focus::Foreground),
            "bg" => self.engine.set_focus(Focus::Background),
            "sync" => {
                if self.triggers.try_send(()).is_err() {
                    println!("sync already queued");
                }
            }
            "select" => {
                let unit = self.unit_arg(&argument);
                match &unit {
                    Some(unit) => println!("selected {unit}"),
                    None => println!("selection cleared"),
                }
                self.engine.select_unit(unit);
            }
            "retry" | "abandon" => {
                let Some(unit) = self.unit_arg(&argument) else {
                    println!("usage: :{verb} <UNIT>");
                    return true;
                };
                let decision = if verb == "retry" {
                    ConflictDecision::Retry
                } else {
                    ConflictDecision::Abandon
                };
                // Outcomes and failures reach the operator through the sink.
                let _ = self.engine.resolve_conflict(&unit, decision).await;
            }
            "status" => self.print_status(),
            other => println!("unknown console command :{other}"),
        }
        true
    }

    fn unit_arg(&self, argument: &str) -> Option<UnitId> {
        if argument.is_empty() {
            return None;
        }
        resolve_unit_exact(argument, self.engine.grammar().aliases())
    }

    fn show(&self, submission: Submission) {
        if let Some(ReconcileOutcome::Skipped) = submission.refresh {
            println!("refresh already in flight");
        }
        for action in &submission.direct {
            let lines = self
                .engine
                .with_cache(|cache| direct_action(cache, action, self.engine.grammar().aliases()));
            for line in lines {
                println!("{line}");
            }
            if action.verb == "SEARCH" {
                let history = self.engine.store().profile(&self.engine.session().operator);
                for address in history.addresses.matching(&action.argument) {
                    println!("  recent address {address}");
                }
            }
        }
    }

    fn print_status(&self) {
        println!("connection: {:?}", self.engine.liveness());
        match serde_json::to_string(&self.engine.metrics()) {
            Ok(metrics) => println!("metrics: {metrics}"),
            Err(err) => println!("metrics unavailable: {err}"),
        }
        let conflicts = self.engine.pending_conflicts();
        if !conflicts.is_empty() {
            let names: Vec<String> = conflicts.iter().map(ToString::to_string).collect();
            println!("pending conflicts: {}", names.join(", "));
        }
        for (index, description) in self.engine.undo_history().iter().enumerate() {
            println!("undo {}: {description}", index + 1);
        }
    }
}

/// Answer a non-mutating command from the cached board.
fn direct_action(cache: &StateCache, action: &DirectAction, aliases: &UnitAliasTable) -> Vec<String> {
    match action.verb.as_str() {
        "WHO" => {
            let mut units: Vec<_> = cache.units().filter(|unit| unit.active).collect();
            units.sort_by(|a, b| a.unit_id.as_str().cmp(b.unit_id.as_str()));
            if units.is_empty() {
                return vec!["no units on the board".to_string()];
            }
            units
                .into_iter()
                .map(|unit| {
                    let incident = unit
                        .incident
                        .as_ref()
                        .map(|id| format!(" {id}"))
                        .unwrap_or_default();
                    let destination = unit
                        .destination
                        .as_deref()
                        .map(|dest| format!(" -> {dest}"))
                        .unwrap_or_default();
                    format!("{:<6} {}{incident}{destination}", unit.unit_id.as_str(), unit.status)
                })
                .collect()
        }
        "INFO" => {
            let Some(unit_id) = resolve_unit_exact(&action.argument, aliases) else {
                return vec![format!("INFO needs a unit, got {:?}", action.argument)];
            };
            let Some(unit) = cache.unit(&unit_id) else {
                return vec![format!("{unit_id} is not on the board")];
            };
            let mut lines = vec![format!(
                "{} {} updated {} by {}",
                unit.unit_id, unit.status, unit.revision, unit.updated_by
            )];
            if !unit.note.is_empty() {
                lines.push(format!("  note: {}", unit.note));
            }
            if let Some(stack) = cache.board().stack(&unit_id) {
                let incidents: Vec<String> = stack.incidents().map(ToString::to_string).collect();
                lines.push(format!("  incidents: {}", incidents.join(", ")));
            }
            if let Some(priority) = cache.aggregate_priority(&unit_id) {
                lines.push(format!("  priority: {priority}"));
            }
            lines
        }
        "HIST" => {
            let Some(unit_id) = resolve_unit_exact(&action.argument, aliases) else {
                return vec![format!("HIST needs a unit, got {:?}", action.argument)];
            };
            let records = cache.board().records_for(&unit_id);
            if records.is_empty() {
                return vec![format!("no assignments for {unit_id}")];
            }
            records
                .into_iter()
                .map(|record| {
                    let state = if record.cleared { "cleared" } else { "open" };
                    format!("  {} {:?} #{} {state}", record.incident_id, record.role, record.order)
                })
                .collect()
        }
        "SEARCH" => {
            let needle = action.argument.to_ascii_uppercase();
            let mut lines: Vec<String> = cache
                .incidents()
                .filter(|incident| {
                    incident.incident_id.as_str().contains(&needle)
                        || incident.scene_address.to_ascii_uppercase().contains(&needle)
                        || incident.note.to_ascii_uppercase().contains(&needle)
                })
                .map(|incident| {
                    format!(
                        "{} {:?} {} {}",
                        incident.incident_id,
                        incident.status,
                        incident.incident_type,
                        incident.scene_address
                    )
                })
                .collect();
            if lines.is_empty() {
                lines.push(format!("no incidents match {:?}", action.argument));
            }
            lines
        }
        "HELP" => HELP.lines().map(str::to_string).collect(),
        other => vec![format!("{other} is not available in the console")],
    }
}

const HELP: &str = "\
<STATUS> <UNIT> [INC] [DEST] [; note]   status change, also <UNIT> <STATUS>
ASSIGN|QUEUE|PRIMARY|CLEAR <INC> <UNIT> assignment changes
LOGOFF <UNIT> [FORCE]                   take a unit off the board
OK <UNIT> | ETA <UNIT> <MIN> | PAT <UNIT> <TEXT>
NEW <TYPE> <ADDRESS> [; note]           create an incident
NOTE <INC> <TEXT> | CLOSE <INC> [DISPOSITION]
MSG <TO> <TEXT> | BCAST <TEXT>
WHO | INFO <UNIT> | HIST <UNIT> | SEARCH <TEXT>
UNDO | REFRESH
Separate commands with | to chain them.
:fg :bg :sync :status :select <UNIT> :retry <UNIT> :abandon <UNIT> :q";
