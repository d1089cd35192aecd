// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive operator shell.
//!
//! Line-oriented commands: `connect`, `list media`, `list text`,
//! `distort <file> <factor>`, `check status`, `clear`, `logout`. Each
//! distortion runs as its own task; at most one job per media class is
//! active at a time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use mangle_core::{ClientConfig, MediaKind};

use crate::coordinator::CoordinatorLink;
use crate::error::ClientError;
use crate::job::{self, JobSpec, Progress};

struct RunningJob {
    filename: String,
    progress: Progress,
    handle: JoinHandle<Result<(), ClientError>>,
}

struct Shell {
    cfg: ClientConfig,
    link: Option<Arc<CoordinatorLink>>,
    jobs: HashMap<MediaKind, RunningJob>,
}

/// Run the shell until `logout`, EOF, or SIGINT.
pub async fn run(cfg: ClientConfig) -> std::io::Result<()> {
    let mut shell = Shell { cfg, link: None, jobs: HashMap::new() };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{} ready. Type 'connect' to join the cluster.", shell.cfg.user);
    prompt();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !shell.dispatch(line.trim()).await {
                        break;
                    }
                    prompt();
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    shell.shutdown().await;
    Ok(())
}

fn prompt() {
    use std::io::Write;
    print!("$ ");
    let _ = std::io::stdout().flush();
}

impl Shell {
    /// Handle one command line. Returns false when the shell should exit.
    async fn dispatch(&mut self, line: &str) -> bool {
        let upper = line.to_uppercase();
        match upper.as_str() {
            "" => {}
            "CONNECT" => self.connect().await,
            "LIST MEDIA" => self.list(MediaKind::Media),
            "LIST TEXT" => self.list(MediaKind::Text),
            "CHECK STATUS" => self.check_status().await,
            "CLEAR" => print!("\x1b[2J\x1b[H"),
            "LOGOUT" => return false,
            _ if upper.starts_with("DISTORT ") => self.distort(line).await,
            _ => println!("Unknown command: {line}"),
        }
        true
    }

    async fn connect(&mut self) {
        if self.link.is_some() {
            println!("Already connected.");
            return;
        }
        let addr = format!("{}:{}", self.cfg.coord_ip, self.cfg.coord_port);
        match CoordinatorLink::connect(&addr, &self.cfg.user).await {
            Ok(link) => {
                println!("{} connected to the cluster.", self.cfg.user);
                self.link = Some(Arc::new(link));
            }
            Err(e) => println!("Connection failed: {e}"),
        }
    }

    fn list(&self, kind: MediaKind) {
        let entries = match std::fs::read_dir(&self.cfg.user_dir) {
            Ok(entries) => entries,
            Err(e) => {
                println!("Cannot read {}: {e}", self.cfg.user_dir.display());
                return;
            }
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| MediaKind::from_path(&entry.path()) == Some(kind))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        if names.is_empty() {
            println!("No {kind} files in {}.", self.cfg.user_dir.display());
            return;
        }
        println!("There are {} {kind} files available:", names.len());
        for (i, name) in names.iter().enumerate() {
            println!("{}. {name}", i + 1);
        }
    }

    /// `distort <file> <factor>`
    async fn distort(&mut self, line: &str) {
        let Some(link) = self.link.clone() else {
            println!("Not connected. Type 'connect' first.");
            return;
        };

        let parts: Vec<&str> = line.split_whitespace().collect();
        let (filename, factor_str) = match parts.as_slice() {
            [_, filename, factor] => (*filename, *factor),
            _ => {
                println!("Usage: distort <file> <factor>");
                return;
            }
        };
        let Ok(factor) = factor_str.parse::<u32>() else {
            println!("Factor must be a number.");
            return;
        };
        let Some(kind) = MediaKind::from_path(Path::new(filename)) else {
            println!("Unknown media type for '{filename}'.");
            return;
        };
        if filename.contains('&') {
            println!("File names must not contain '&'.");
            return;
        }
        if !self.cfg.user_dir.join(filename).is_file() {
            println!("No such file in {}.", self.cfg.user_dir.display());
            return;
        }

        // One job per media class at a time.
        if let Some(job) = self.jobs.get(&kind) {
            if !job.handle.is_finished() {
                println!("A {kind} distortion ('{}') is already running.", job.filename);
                return;
            }
        }

        let spec = JobSpec::new(&self.cfg.user, &self.cfg.user_dir, filename, kind, factor);
        let progress = Progress::default();
        let job_progress = progress.clone();
        let handle = tokio::spawn(async move { job::run(&link, &spec, &job_progress).await });

        self.jobs.insert(
            kind,
            RunningJob { filename: filename.to_string(), progress, handle },
        );
        println!("Distortion of '{filename}' started.");
    }

    async fn check_status(&mut self) {
        if self.jobs.is_empty() {
            println!("You have no ongoing or finished distortions.");
            return;
        }
        for kind in [MediaKind::Text, MediaKind::Media] {
            let Some(job) = self.jobs.get_mut(&kind) else { continue };
            if job.handle.is_finished() {
                let filename = job.filename.clone();
                let outcome = (&mut job.handle).await;
                match outcome {
                    Ok(Ok(())) => println!("{kind} '{filename}': 100% — done."),
                    Ok(Err(e)) => println!("{kind} '{filename}': failed — {e}"),
                    Err(_) => println!("{kind} '{filename}': aborted."),
                }
                self.jobs.remove(&kind);
            } else {
                println!("{kind} '{}': {}%", job.filename, job.progress.percent());
            }
        }
    }

    /// Abandon in-flight jobs and say goodbye to the coordinator.
    async fn shutdown(&mut self) {
        for (_, job) in self.jobs.drain() {
            job.handle.abort();
        }
        if let Some(link) = self.link.take() {
            if link.disconnect().await.is_err() {
                println!("Coordinator link already gone.");
            }
        }
        println!("Goodbye.");
    }
}
