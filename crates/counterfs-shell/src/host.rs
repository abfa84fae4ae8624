// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-process host: resolves paths and drives a mounted session the way a
//! VFS layer would.

use std::io::{BufRead, Write};

use anyhow::{bail, ensure, Context, Result};
use counterfs_core::{
    Attributes, FilesystemSession, FsError, FsResult, HandleId, NodeId, NodeType,
};
use tracing::{debug, warn};

use crate::script::{parse_line, Command};

const CREATE_FILE_MODE: u32 = 0o644;
const CREATE_DIR_MODE: u32 = 0o755;

pub struct Host {
    fs: FilesystemSession,
    chunk_size: usize,
}

impl Host {
    /// `chunk_size` is the buffer length `cat` passes to each read call.
    pub fn new(fs: FilesystemSession, chunk_size: usize) -> Result<Self> {
        ensure!(chunk_size > 0, "chunk size must be positive");
        Ok(Self { fs, chunk_size })
    }

    #[cfg(test)]
    pub fn session(&self) -> &FilesystemSession {
        &self.fs
    }

    pub fn into_session(self) -> FilesystemSession {
        self.fs
    }

    /// Run every command in `input`, stopping at the first failure.
    pub fn run_script<R: BufRead, W: Write>(&self, input: R, out: &mut W) -> Result<()> {
        for (index, line) in input.lines().enumerate() {
            let line = line.context("reading script")?;
            let line_no = index + 1;
            let Some(command) = parse_line(&line).with_context(|| format!("line {line_no}"))?
            else {
                continue;
            };
            self.execute(&command, out)
                .with_context(|| format!("line {line_no}: {}", line.trim()))?;
        }
        Ok(())
    }

    pub fn execute<W: Write>(&self, command: &Command, out: &mut W) -> Result<()> {
        debug!(?command, "executing");
        match command {
            Command::Cat { path } => self.cat(path, out),
            Command::Write { path, value } => self.write_value(path, value),
            Command::Touch { path } => self.touch(path).map(|_| ()),
            Command::Mkdir { path } => self.mkdir(path),
            Command::Ls { path } => self.ls(path.as_deref().unwrap_or("/"), out),
            Command::Stat { path } => self.stat(path, out),
            Command::Tree => self.tree(out),
            Command::Statfs => self.statfs(out),
        }
    }

    /// Walk `path` from the root one `lookup` at a time.
    pub fn resolve(&self, path: &str) -> FsResult<NodeId> {
        components(path).try_fold(self.fs.root(), |dir, name| self.fs.lookup(dir, name))
    }

    /// Resolve everything but the last component.
    fn resolve_parent<'p>(&self, path: &'p str) -> Result<(NodeId, &'p str)> {
        let parts: Vec<&str> = components(path).collect();
        let Some((leaf, dirs)) = parts.split_last() else {
            bail!("{path}: refers to the root directory");
        };
        let parent = dirs
            .iter()
            .try_fold(self.fs.root(), |dir, name| self.fs.lookup(dir, name))
            .with_context(|| format!("{path}: resolving parent"))?;
        Ok((parent, *leaf))
    }

    /// Open `path`, creating a counter file when the lookup misses.
    fn touch(&self, path: &str) -> Result<NodeId> {
        let (parent, name) = self.resolve_parent(path)?;
        match self.fs.lookup(parent, name) {
            Ok(id) => Ok(id),
            Err(FsError::NotFound) => self
                .fs
                .create(parent, name, CREATE_FILE_MODE)
                .with_context(|| format!("{path}: create")),
            Err(e) => Err(e).with_context(|| format!("{path}: lookup")),
        }
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        match self.fs.lookup(parent, name) {
            Ok(_) => bail!("{path}: already exists"),
            Err(FsError::NotFound) => {
                self.fs
                    .mkdir(parent, name, CREATE_DIR_MODE)
                    .with_context(|| format!("{path}: mkdir"))?;
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("{path}: lookup")),
        }
    }

    fn cat<W: Write>(&self, path: &str, out: &mut W) -> Result<()> {
        let id = self.resolve(path).with_context(|| format!("{path}: lookup"))?;
        let handle = self.fs.open(id).with_context(|| format!("{path}: open"))?;
        let result = self.drain(handle, out);
        self.fs.close(handle).with_context(|| format!("{path}: close"))?;
        result.with_context(|| format!("{path}: read"))
    }

    fn drain<W: Write>(&self, handle: HandleId, out: &mut W) -> Result<()> {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = self.fs.read(handle, &mut buf)?;
            if n == 0 {
                return Ok(());
            }
            out.write_all(&buf[..n])?;
        }
    }

    /// `echo VALUE > PATH`: create on miss, then write `VALUE\n` at offset 0.
    fn write_value(&self, path: &str, value: &str) -> Result<()> {
        let id = self.touch(path)?;
        let handle = self.fs.open(id).with_context(|| format!("{path}: open"))?;
        let payload = format!("{value}\n");
        let result = self.fs.write(handle, payload.as_bytes());
        self.fs.close(handle).with_context(|| format!("{path}: close"))?;

        let written = result.with_context(|| format!("{path}: write"))?;
        if written != payload.len() {
            warn!(path, written, expected = payload.len(), "short write");
        }
        Ok(())
    }

    fn ls<W: Write>(&self, path: &str, out: &mut W) -> Result<()> {
        let id = self.resolve(path).with_context(|| format!("{path}: lookup"))?;
        for entry in self.fs.readdir(id).with_context(|| format!("{path}: readdir"))? {
            match entry.node_type {
                NodeType::Directory => writeln!(out, "{}/", entry.name)?,
                NodeType::CounterFile => writeln!(out, "{}", entry.name)?,
            }
        }
        Ok(())
    }

    fn stat<W: Write>(&self, path: &str, out: &mut W) -> Result<()> {
        let id = self.resolve(path).with_context(|| format!("{path}: lookup"))?;
        let attrs = self.fs.getattr(id).with_context(|| format!("{path}: getattr"))?;
        writeln!(out, "{path}: {}", format_attributes(&attrs))?;
        Ok(())
    }

    /// Walks node ids directly, so it also works when lookups never match.
    fn tree<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "/")?;
        self.print_dir(self.fs.root(), 1, out)
    }

    fn print_dir<W: Write>(&self, dir: NodeId, depth: usize, out: &mut W) -> Result<()> {
        let indent = "  ".repeat(depth);
        for entry in self.fs.readdir(dir)? {
            match entry.node_type {
                NodeType::Directory => {
                    writeln!(out, "{indent}{}/", entry.name)?;
                    self.print_dir(entry.id, depth + 1, out)?;
                }
                NodeType::CounterFile => writeln!(out, "{indent}{}", entry.name)?,
            }
        }
        Ok(())
    }

    fn statfs<W: Write>(&self, out: &mut W) -> Result<()> {
        let stat = self.fs.statfs();
        writeln!(
            out,
            "magic={:#x} bsize={} namemax={} files={}",
            stat.magic, stat.block_size, stat.name_max, stat.files
        )?;
        Ok(())
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

fn format_attributes(attrs: &Attributes) -> String {
    let kind = match attrs.node_type {
        NodeType::Directory => "directory",
        NodeType::CounterFile => "counter",
    };
    format!(
        "id={} type={kind} mode={:o} uid={} gid={} size={} mtime={}",
        attrs.id, attrs.mode, attrs.uid, attrs.gid, attrs.len, attrs.times.mtime
    )
}

/// errno of the first core error in `err`'s chain, if any.
pub fn errno_of(err: &anyhow::Error) -> Option<i32> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<FsError>())
        .map(FsError::errno)
}

#[cfg(test)]
mod tests {
    use super::*;
    use counterfs_core::FsConfig;

    fn host() -> Host {
        host_with(FsConfig::default(), 80)
    }

    fn host_with(config: FsConfig, chunk_size: usize) -> Host {
        let fs = FilesystemSession::mount(config).expect("mount");
        Host::new(fs, chunk_size).expect("host")
    }

    fn run(host: &Host, script: &str) -> Result<String> {
        let mut out = Vec::new();
        host.run_script(script.as_bytes(), &mut out)?;
        Ok(String::from_utf8(out).expect("utf8"))
    }

    #[test]
    fn test_cat_increments_between_sessions() {
        let host = host();
        let out = run(&host, "cat /counter1\ncat /counter1\ncat folder1/counter2\n").unwrap();
        assert_eq!(out, "0\n1\n0\n");
    }

    #[test]
    fn test_write_then_cat() {
        let host = host();
        let out = run(&host, "write /counter1 42\ncat /counter1\ncat /counter1\n").unwrap();
        assert_eq!(out, "42\n43\n");
    }

    #[test]
    fn test_small_chunks_read_one_snapshot() {
        let host = host_with(FsConfig::default(), 1);
        let out = run(&host, "write /counter1 -1234\ncat /counter1\ncat /counter1\n").unwrap();
        assert_eq!(out, "-1234\n-1233\n");
    }

    #[test]
    fn test_write_creates_missing_file() {
        let host = host();
        let out = run(&host, "write /fresh 7\ncat /fresh\nls\n").unwrap();
        assert_eq!(out, "7\ncounter1\nfolder1/\nfresh\n");
    }

    #[test]
    fn test_touch_and_mkdir_grow_the_tree() {
        let host = host();
        let script = "mkdir /a\nmkdir /a/b\ntouch /a/b/c\ntouch /a/b/c\ntree\n";
        let out = run(&host, script).unwrap();
        assert_eq!(
            out,
            "/\n  a/\n    b/\n      c\n  counter1\n  folder1/\n    counter2\n"
        );
    }

    #[test]
    fn test_mkdir_existing_fails() {
        let host = host();
        let err = run(&host, "mkdir /folder1\n").unwrap_err();
        assert!(format!("{err:#}").contains("already exists"), "{err:#}");
    }

    #[test]
    fn test_oversized_write_reports_einval() {
        let host = host();
        let value = "9".repeat(80);
        let err = run(&host, &format!("write /counter1 {value}\n")).unwrap_err();
        assert_eq!(
            errno_of(&err),
            Some(FsError::BufferTooLarge { len: 81, capacity: 80 }.errno())
        );
        // The counter keeps its previous value.
        assert_eq!(run(&host, "cat /counter1\n").unwrap(), "0\n");
    }

    #[test]
    fn test_missing_path_reports_enoent() {
        let host = host();
        let err = run(&host, "# comment\n\ncat /nope\n").unwrap_err();
        assert!(format!("{err:#}").starts_with("line 3"), "{err:#}");
        assert_eq!(errno_of(&err), Some(FsError::NotFound.errno()));
    }

    #[test]
    fn test_cat_directory_fails() {
        let host = host();
        let err = run(&host, "cat /folder1\n").unwrap_err();
        assert_eq!(errno_of(&err), Some(FsError::IsADirectory.errno()));
        assert_eq!(host.session().stats().open_handles, 0);
    }

    #[test]
    fn test_stat_and_statfs() {
        let host = host();
        let out = run(&host, "stat /folder1\nstatfs\n").unwrap();
        let mut lines = out.lines();
        let stat = lines.next().expect("stat line");
        assert!(stat.starts_with("/folder1: id=#"), "{stat}");
        assert!(stat.contains("type=directory mode=40755"), "{stat}");
        assert_eq!(
            lines.next(),
            Some("magic=0x19980122 bsize=4096 namemax=255 files=4")
        );
    }

    #[test]
    fn test_legacy_lookup_still_lists_tree() {
        let host = host_with(FsConfig::legacy_compatible(), 80);
        let out = run(&host, "tree\n").unwrap();
        assert_eq!(out, "/\n  counter1\n  folder1/\n    counter2\n");

        let err = run(&host, "cat /counter1\n").unwrap_err();
        assert_eq!(errno_of(&err), Some(FsError::NotFound.errno()));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let fs = FilesystemSession::mount(FsConfig::default()).expect("mount");
        assert!(Host::new(fs, 0).is_err());
    }
}
