use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::mpsc::{self, error::TryRecvError};
use toolwarden_tools::{ApprovalError, ApprovalProvider, ApprovalRequest, ApprovalResponse};

type Line = io::Result<Option<String>>;

struct LineReader {
    demand: std_mpsc::Sender<()>,
    lines: mpsc::UnboundedReceiver<Line>,
    // A read was requested for a prompt whose request has since gone away.
    outstanding: bool,
}

/// Prompts on a terminal and waits for a `y`/`n` answer.
///
/// Lines are read on a dedicated thread, one per prompt. A prompt abandoned
/// by the coordinator's timeout or cancellation does not block the next
/// question; an answer typed for it before the next question is discarded.
pub struct TerminalApprovalProvider {
    output: Mutex<Box<dyn Write + Send>>,
    reader: tokio::sync::Mutex<LineReader>,
}

impl TerminalApprovalProvider {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }

    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        let (demand, demand_rx) = std_mpsc::channel();
        let (line_tx, lines) = mpsc::unbounded_channel();
        thread::spawn(move || read_lines(input, demand_rx, line_tx));

        Self {
            output: Mutex::new(Box::new(output)),
            reader: tokio::sync::Mutex::new(LineReader {
                demand,
                lines,
                outstanding: false,
            }),
        }
    }

    fn write_prompt(&self, question: &str) -> io::Result<()> {
        let mut output = self.output.lock();
        write!(output, "{}", question)?;
        output.flush()
    }
}

fn read_lines(
    mut input: impl BufRead,
    demand: std_mpsc::Receiver<()>,
    lines: mpsc::UnboundedSender<Line>,
) {
    while demand.recv().is_ok() {
        let mut line = String::new();
        let result = match input.read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line)),
            Err(e) => Err(e),
        };
        let finished = !matches!(result, Ok(Some(_)));
        if lines.send(result).is_err() || finished {
            return;
        }
    }
}

#[async_trait]
impl ApprovalProvider for TerminalApprovalProvider {
    async fn request_approval(
        &self,
        request: &ApprovalRequest,
    ) -> Result<ApprovalResponse, ApprovalError> {
        let mut reader = self.reader.lock().await;

        if reader.outstanding {
            match reader.lines.try_recv() {
                Ok(_) => reader.outstanding = false,
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return Err(ApprovalError::Closed),
            }
        }

        let question = format!("Approve action: {} [y/N] ", request.summary());
        self.write_prompt(&question)
            .map_err(|e| ApprovalError::Unavailable(e.to_string()))?;

        if !reader.outstanding {
            reader
                .demand
                .send(())
                .map_err(|_| ApprovalError::Closed)?;
            reader.outstanding = true;
        }

        let answer = reader.lines.recv().await;
        reader.outstanding = false;

        match answer {
            None | Some(Ok(None)) => Err(ApprovalError::Closed),
            Some(Err(e)) => Err(ApprovalError::Unavailable(e.to_string())),
            Some(Ok(Some(line))) => match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => Ok(ApprovalResponse::approve()),
                _ => Ok(ApprovalResponse::deny("declined at terminal")),
            },
        }
    }
}
