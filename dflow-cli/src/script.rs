//! The plain-text script format both launcher binaries run (spec §6,
//! "CLI surface"). Each non-blank, non-`#`-comment line is one operation
//! against the worker client; `$1`, `$2`, ... in a line are substituted
//! with the launcher's trailing script arguments before parsing.
//!
//! This stands in for the original's embedded task-generating scripting
//! layer, which spec §1 places outside the core's scope — what's
//! implemented here is the launcher *contract* (script path + args in,
//! exit code out), not a general-purpose language.

use std::path::Path;

use dflow_client::{ClientError, PutSpec, WorkerClient};
use dflow_net::RefcPolicy;
use dflow_types::{DatumType, Priority, RcDelta, WorkType};

use crate::error::{Result, ScriptError};

#[derive(Debug, Clone)]
enum Op {
    Create { ty: DatumType, read_rc: i64, write_rc: i64 },
    Store { id: i64, payload: Vec<u8> },
    Retrieve { id: i64 },
    Put { work_type: WorkType, priority: Priority, payload: Vec<u8> },
    Get { work_type: WorkType },
    Shutdown,
}

fn substitute(line: &str, argv: &[String]) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            let mut digits = String::new();
            while let Some(d) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(*d);
                    chars.next();
                } else {
                    break;
                }
            }
            if let Ok(n) = digits.parse::<usize>() {
                if n >= 1 {
                    if let Some(arg) = argv.get(n - 1) {
                        out.push_str(arg);
                    }
                    continue;
                }
            }
            out.push('$');
            out.push_str(&digits);
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_type(token: &str, line: usize) -> Result<DatumType> {
    match token {
        "int" => Ok(DatumType::Int),
        "float" => Ok(DatumType::Float),
        "str" => Ok(DatumType::Str),
        "blob" => Ok(DatumType::Blob),
        other => Err(ScriptError::Parse { line, message: format!("unknown datum type {other:?}") }),
    }
}

fn parse_line(line: &str, line_no: usize) -> Result<Op> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let bad = |message: &str| Err(ScriptError::Parse { line: line_no, message: message.to_string() });

    match tokens.as_slice() {
        ["create", ty, read_rc, write_rc] => Ok(Op::Create {
            ty: parse_type(ty, line_no)?,
            read_rc: read_rc
                .parse()
                .map_err(|_| ScriptError::Parse { line: line_no, message: "read_rc must be an integer".into() })?,
            write_rc: write_rc
                .parse()
                .map_err(|_| ScriptError::Parse { line: line_no, message: "write_rc must be an integer".into() })?,
        }),
        ["store", id, rest @ ..] if !rest.is_empty() => Ok(Op::Store {
            id: id.parse().map_err(|_| ScriptError::Parse { line: line_no, message: "id must be an integer".into() })?,
            payload: rest.join(" ").into_bytes(),
        }),
        ["retrieve", id] => Ok(Op::Retrieve {
            id: id.parse().map_err(|_| ScriptError::Parse { line: line_no, message: "id must be an integer".into() })?,
        }),
        ["put", work_type, priority, rest @ ..] if !rest.is_empty() => Ok(Op::Put {
            work_type: work_type
                .parse()
                .map_err(|_| ScriptError::Parse { line: line_no, message: "work_type must be an integer".into() })?,
            priority: priority
                .parse()
                .map_err(|_| ScriptError::Parse { line: line_no, message: "priority must be an integer".into() })?,
            payload: rest.join(" ").into_bytes(),
        }),
        ["get", work_type] => Ok(Op::Get {
            work_type: work_type
                .parse()
                .map_err(|_| ScriptError::Parse { line: line_no, message: "work_type must be an integer".into() })?,
        }),
        ["shutdown"] => Ok(Op::Shutdown),
        [] => unreachable!("blank lines are filtered before parse_line"),
        _ => bad("unrecognized operation"),
    }
}

/// Read `path`, substitute `argv` into each line, and run every
/// operation against `client` targeting `server` in order. Stops at the
/// first error (script error or operation failure) and reports which
/// line it happened on.
pub async fn run(client: &WorkerClient, server: dflow_types::Rank, path: &Path, argv: &[String]) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .map_err(|source| ScriptError::Io { path: path.display().to_string(), source })?;

    for (idx, raw_line) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let line = substitute(raw_line, argv);
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let op = parse_line(trimmed, line_no)?;
        run_op(client, server, line_no, op).await?;
    }
    Ok(())
}

async fn run_op(client: &WorkerClient, server: dflow_types::Rank, line_no: usize, op: Op) -> Result<()> {
    let wrap = |e: ClientError| ScriptError::Operation { line: line_no, source: e };
    match op {
        Op::Create { ty, read_rc, write_rc } => {
            let id = client.create(server, 0, ty, read_rc, write_rc, false).await.map_err(wrap)?;
            println!("created {id}");
        }
        Op::Store { id, payload } => {
            client.store(id, None, DatumType::Blob, payload, RcDelta::write(1)).await.map_err(wrap)?;
            println!("stored {id}");
        }
        Op::Retrieve { id } => {
            let (_, bytes) = client.retrieve(id, None, RefcPolicy::default()).await.map_err(wrap)?;
            println!("{}", String::from_utf8_lossy(&bytes));
        }
        Op::Put { work_type, priority, payload } => {
            let spec = PutSpec::untargeted(payload, client.rank(), work_type, priority);
            client.put(server, spec).await.map_err(wrap)?;
            println!("put ok");
        }
        Op::Get { work_type } => {
            let assignment = client.get(server, work_type).await.map_err(wrap)?;
            println!("{}", String::from_utf8_lossy(&assignment.payload));
        }
        Op::Shutdown => {
            client.shutdown(server).await.map_err(wrap)?;
            println!("shutdown sent");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_positional_args() {
        let argv = vec!["hello".to_string(), "world".to_string()];
        assert_eq!(substitute("store 1 $1 $2", &argv), "store 1 hello world");
        assert_eq!(substitute("store 1 $9", &argv), "store 1 ");
    }

    #[test]
    fn parses_every_op_kind() {
        assert!(matches!(parse_line("create int 1 1", 1).unwrap(), Op::Create { .. }));
        assert!(matches!(parse_line("store 3 hi there", 2).unwrap(), Op::Store { .. }));
        assert!(matches!(parse_line("retrieve 3", 3).unwrap(), Op::Retrieve { .. }));
        assert!(matches!(parse_line("put 0 5 payload", 4).unwrap(), Op::Put { .. }));
        assert!(matches!(parse_line("get 0", 5).unwrap(), Op::Get { .. }));
        assert!(matches!(parse_line("shutdown", 6).unwrap(), Op::Shutdown));
    }

    #[test]
    fn rejects_unknown_op() {
        assert!(parse_line("frobnicate", 1).is_err());
    }
}
