//! Terminal prompts for the generate flow.

use std::future::Future;
use std::io::{self, BufRead, Write};
use std::pin::Pin;
use tether_declare::{ClassifiedTool, ReviewDecider, ReviewDecision, parse_scopes};

/// Asks the operator about each tool on stderr, reading answers from stdin.
pub struct TerminalReviewDecider;

impl ReviewDecider for TerminalReviewDecider {
    fn decide<'a>(
        &'a self,
        tool: &'a ClassifiedTool,
    ) -> Pin<Box<dyn Future<Output = ReviewDecision> + Send + 'a>> {
        let name = tool.name().to_string();
        let scopes = tool.scope_label();
        let high_risk = tool.high_risk;

        Box::pin(async move {
            // Use spawn_blocking since we read from stdin
            let result = tokio::task::spawn_blocking(move || {
                let stderr = io::stderr();
                let mut err = stderr.lock();

                let _ = writeln!(err);
                let _ = writeln!(err, "  {name}");
                let _ = writeln!(err, "  scopes: {scopes}");
                if high_risk {
                    let _ = writeln!(err, "  high risk");
                }

                loop {
                    let _ = write!(err, "  [Enter] accept  [e] edit scopes  [x] exclude  > ");
                    let _ = err.flush();
                    let Some(input) = read_line() else {
                        return ReviewDecision::Accept;
                    };
                    match parse_choice(&input) {
                        Some(Choice::Accept) => return ReviewDecision::Accept,
                        Some(Choice::Exclude) => return ReviewDecision::Exclude,
                        Some(Choice::Edit) => {
                            let _ = write!(err, "  scopes (comma-separated): ");
                            let _ = err.flush();
                            let entered = read_line().unwrap_or_default();
                            return ReviewDecision::Edit(parse_scopes(&entered));
                        }
                        None => {
                            let _ = writeln!(err, "  Unrecognized choice: {}", input.trim());
                        }
                    }
                }
            })
            .await;

            // A prompt that could not run keeps nothing
            result.unwrap_or(ReviewDecision::Exclude)
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Choice {
    Accept,
    Edit,
    Exclude,
}

fn parse_choice(input: &str) -> Option<Choice> {
    match input.trim().to_lowercase().as_str() {
        "" | "a" | "accept" => Some(Choice::Accept),
        "e" | "edit" => Some(Choice::Edit),
        "x" | "exclude" => Some(Choice::Exclude),
        _ => None,
    }
}

/// One line from stdin, or `None` at end of input.
fn read_line() -> Option<String> {
    let mut input = String::new();
    match io::stdin().lock().read_line(&mut input) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(input),
    }
}

/// Prompt for a single value.
pub async fn ask(label: &str) -> io::Result<String> {
    let label = label.to_string();
    tokio::task::spawn_blocking(move || {
        let mut err = io::stderr();
        write!(err, "{label}: ")?;
        err.flush()?;
        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        Ok(input.trim().to_string())
    })
    .await
    .map_err(io::Error::other)?
}
