use std::borrow::Cow::{self, Borrowed, Owned};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use tokio::task::JoinHandle;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use civic_application::{CivicApp, DialogueSession, TurnOutcome, TurnPhase, TurnResolution, seed_if_empty};
use civic_core::action::MapAction;
use civic_core::geo::LatLng;
use civic_core::identity::IdentityProvider;
use civic_core::proposal::group_by_site;
use civic_infrastructure::{ConfigService, StaticIdentity};

/// Lower Manhattan, where the sample proposals sit.
const DEFAULT_SITE: LatLng = LatLng {
    lat: 40.7128,
    lng: -74.0060,
};

const COMMANDS: [&str; 11] = [
    "/new", "/refine", "/submit", "/retry", "/status", "/pins", "/upvote", "/report", "/score",
    "/help", "/quit",
];

/// Completes and hints slash commands, colours user input.
#[derive(Clone)]
struct CliHelper {
    commands: Vec<String>,
}

impl CliHelper {
    fn new() -> Self {
        Self {
            commands: COMMANDS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl Helper for CliHelper {}

impl Completer for CliHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line = &line[..pos];

        if line.starts_with('/') {
            let candidates: Vec<Pair> = self
                .commands
                .iter()
                .filter(|cmd| cmd.starts_with(line))
                .map(|cmd| Pair {
                    display: cmd.clone(),
                    replacement: cmd.clone(),
                })
                .collect();
            Ok((0, candidates))
        } else {
            Ok((0, vec![]))
        }
    }
}

impl Highlighter for CliHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if line.starts_with('/') {
            Owned(line.bright_cyan().to_string())
        } else {
            Borrowed(line)
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Hinter for CliHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let line = &line[..pos];

        if line.starts_with('/') && !line.contains(' ') {
            self.commands
                .iter()
                .find(|cmd| cmd.starts_with(line) && cmd.len() > line.len())
                .map(|cmd| cmd[line.len()..].to_string())
        } else {
            None
        }
    }
}

impl Validator for CliHelper {}

/// Logs go to stderr so the conversation on stdout stays readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("civic=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Parses `lat,lng`.
fn parse_location(text: &str) -> Result<LatLng> {
    let (lat, lng) = text
        .split_once(',')
        .context("expected coordinates as lat,lng")?;
    let location = LatLng::new(lat.trim().parse()?, lng.trim().parse()?);
    Ok(location.validated()?)
}

/// Prints phase changes of the running turn.
fn watch_phases(session: &DialogueSession) -> JoinHandle<()> {
    let mut phases = session.phases();
    tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow_and_update();
            match phase {
                TurnPhase::GeneratingVision => {
                    println!("{}", "Generating vision of your proposal...".bright_magenta())
                }
                TurnPhase::Saving => println!("{}", "Saving proposal...".bright_magenta()),
                _ => {}
            }
        }
    })
}

fn print_outcome(outcome: &TurnOutcome) {
    for line in outcome.display_text.lines() {
        println!("{}", line.bright_blue());
    }

    let score = outcome
        .score
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("{}", format!("[{}] score {}", outcome.status, score).bright_black());

    if outcome.map.action != MapAction::None {
        println!(
            "{}",
            format!("Map: {} at {}", outcome.map.action, outcome.map.coordinates).yellow()
        );
    }

    match &outcome.resolution {
        TurnResolution::Drafting { missing } if !missing.is_empty() => {
            let names: Vec<String> = missing.iter().map(|f| f.to_string()).collect();
            println!("{}", format!("Still needed: {}", names.join(", ")).bright_black());
        }
        TurnResolution::Drafting { .. } => {}
        TurnResolution::Rejected => {
            println!("{}", "Rejected. Describe a different idea to start over.".yellow());
        }
        TurnResolution::AgentUnavailable { message } => {
            println!("{}", format!("Agent unavailable: {message}").yellow());
        }
        TurnResolution::Persisted { proposal, vision } => {
            println!(
                "{}",
                format!(
                    "Saved proposal {} ({}) by {}",
                    proposal.id, proposal.business_type, proposal.author
                )
                .green()
            );
            if vision.success {
                println!("{}", "Vision image attached.".green());
            } else {
                println!("{}", "No vision image this time.".bright_black());
            }
            println!("{}", "Session closed. Use /new to start another proposal.".bright_black());
        }
        TurnResolution::SaveFailed { message } => {
            println!("{}", format!("Save failed: {message}. Type /retry to try again.").red());
        }
    }
}

/// REPL state: the services and the interview in progress.
struct Repl {
    app: CivicApp,
    session: DialogueSession,
    watcher: JoinHandle<()>,
}

impl Repl {
    fn new(app: CivicApp) -> Result<Self> {
        let session = app.sessions.open(DEFAULT_SITE, None)?;
        let watcher = watch_phases(&session);
        Ok(Self {
            app,
            session,
            watcher,
        })
    }

    fn replace_session(&mut self, session: DialogueSession) {
        debug!(previous = self.session.id(), next = session.id(), "Replacing dialogue session");
        self.watcher.abort();
        self.watcher = watch_phases(&session);
        println!(
            "{}",
            format!("New session at {}", session.location()).bright_magenta()
        );
        self.session = session;
    }

    async fn handle(&mut self, line: &str) -> Result<()> {
        let (command, args) = match line.split_once(' ') {
            Some((command, args)) => (command, args.trim()),
            None => (line, ""),
        };

        match command {
            "/new" => {
                let location = if args.is_empty() {
                    self.session.location()
                } else {
                    parse_location(args)?
                };
                let session = self.app.sessions.open(location, None)?;
                self.replace_session(session);
            }
            "/refine" => {
                if args.is_empty() {
                    bail!("usage: /refine <proposal id>");
                }
                let parent = self
                    .app
                    .repository
                    .find_by_id(args)
                    .await?
                    .with_context(|| format!("no proposal with id {args}"))?;
                let session = self.app.sessions.open_refinement(&parent)?;
                println!("{}", format!("Refining \"{}\"", parent.business_type).bright_magenta());
                self.replace_session(session);
            }
            "/submit" => print_outcome(&self.session.force_finalize().await?),
            "/retry" => print_outcome(&self.session.retry_save().await?),
            "/status" => {
                let snapshot = self.session.snapshot().await;
                println!(
                    "{}",
                    format!(
                        "session {} at {}: {} (stalled {}, save pending: {}, closed: {})",
                        snapshot.id,
                        snapshot.location,
                        snapshot.status,
                        snapshot.stalled_turns,
                        snapshot.save_pending,
                        snapshot.closed
                    )
                    .bright_black()
                );
            }
            "/pins" => {
                let recent = self.app.repository.list_recent(50).await?;
                if recent.is_empty() {
                    println!("{}", "No proposals yet.".bright_black());
                }
                for site in group_by_site(&recent) {
                    println!("{}", format!("@ {}", site.location).bright_magenta());
                    for p in &site.proposals {
                        println!(
                            "  {} {} by {} [{}] +{}",
                            p.id.bright_black(),
                            p.business_type,
                            p.author,
                            p.score,
                            p.agreement_count
                        );
                    }
                }
            }
            "/upvote" => {
                if args.is_empty() {
                    bail!("usage: /upvote <proposal id>");
                }
                let count = self.app.repository.upvote(args).await?;
                println!("{}", format!("{args} now has {count} agreements").green());
            }
            "/report" => {
                let report = self.app.reports.generate(self.session.location()).await?;
                if let Some(error) = &report.error {
                    println!("{}", format!("Report unavailable: {error}").yellow());
                } else {
                    println!("{}", format!("Top recommendation: {}", report.top_recommendation).green());
                    println!("Sentiment: {}", report.community_sentiment);
                    for gap in &report.market_gaps {
                        println!("  - {gap}");
                    }
                    println!(
                        "{}",
                        format!("({} proposals analyzed)", report.proposals_analyzed).bright_black()
                    );
                }
            }
            "/score" => {
                let (business_type, review) = match args.split_once('|') {
                    Some((business_type, review)) => (business_type.trim(), review.trim()),
                    None => (args, args),
                };
                let report = self
                    .app
                    .scoring
                    .analyze(business_type, review, self.session.location())
                    .await?;
                println!(
                    "{}",
                    format!(
                        "demand {} / competitors {} -> saturation {:.2}",
                        report.demand_weight, report.competitor_count, report.saturation_index
                    )
                    .green()
                );
            }
            "/help" => print_help(),
            _ if command.starts_with('/') => bail!("unknown command {command}, try /help"),
            _ => print_outcome(&self.session.submit_user_message(line).await?),
        }
        Ok(())
    }
}

fn print_help() {
    let lines = [
        "Describe your idea in plain words to talk with the planning agent.",
        "/new [lat,lng]           start a new proposal (here, or at the given site)",
        "/refine <id>             refine an existing proposal",
        "/submit                  submit now with what has been discussed",
        "/retry                   retry a failed save",
        "/status                  show the session state",
        "/pins                    list recent proposals by site",
        "/upvote <id>             agree with a proposal",
        "/report                  neighborhood needs report around the site",
        "/score <type> [| review] market saturation for a business type",
        "quit                     exit",
    ];
    for line in lines {
        println!("{}", line.bright_black());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // Services
    let config_service = ConfigService::default();
    config_service.paths().ensure_secret_file().await?;
    let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentity::from_env());
    let app = CivicApp::bootstrap(&config_service, identity).await?;
    seed_if_empty(app.repository.as_ref()).await?;

    let demo_mode = app.demo_mode;
    let mut repl = Repl::new(app)?;

    // Editor
    let helper = CliHelper::new();
    let mut rl = Editor::new()?;
    rl.set_helper(Some(helper));

    println!("{}", "=== CivicSense ===".bright_magenta().bold());
    if demo_mode {
        println!("{}", "Running with the offline demo agent (no Gemini API key).".yellow());
    }
    println!("{}", "Type '/help' for commands, or 'quit' to exit.".bright_black());
    println!();
    for line in civic_application::prompts::GREETING.lines() {
        println!("{}", line.bright_blue());
    }

    // Loop
    loop {
        match rl.readline(">> ") {
            Ok(line) => {
                let trimmed = line.trim();

                if trimmed == "quit" || trimmed == "exit" || trimmed == "/quit" {
                    println!("{}", "Session ended.".bright_green());
                    break;
                }
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(&line);

                if let Err(e) = repl.handle(trimmed).await {
                    eprintln!("{}", format!("Error: {e}").red());
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("{}", "Interrupted. Type /quit to leave.".yellow());
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("{}", "End of input, leaving.".bright_green());
                break;
            }
            Err(err) => {
                eprintln!("{}", format!("Error: {:?}", err).red());
                break;
            }
        }
    }

    Ok(())
}
