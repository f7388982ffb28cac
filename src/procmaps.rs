//! `/proc/self/maps` parsing, adapted from an earlier ptrace-era
//! `/proc/<pid>/maps` parser. We only ever read our own process's
//! maps (there is no tracee to address), so the `Pid` parameter is
//! gone, but the `combine` grammar and entry shape are unchanged.

use std::fs::File;
use std::io::{Error, ErrorKind, Read, Result};
use std::path::PathBuf;

use combine::error::ParseError;
use combine::parser::char::{char, hex_digit, spaces};
use combine::Parser;
use combine::{choice, count, many1, none_of, optional, Stream};

use libc;

#[derive(Clone)]
pub struct ProcMapsEntry {
    base: u64,
    size: u64,
    prot: i32,
    flags: i32,
    offset: u64,
    dev: i32,
    inode: u64,
    file: Option<PathBuf>,
}

impl ProcMapsEntry {
    pub fn base(&self) -> u64 {
        self.base
    }
    pub fn size(&self) -> usize {
        self.size as usize
    }
    pub fn end(&self) -> u64 {
        self.base + self.size
    }
    pub fn offset(&self) -> u64 {
        self.offset
    }
    pub fn filename(&self) -> Option<&PathBuf> {
        self.file.iter().next()
    }
    pub fn is_exec(&self) -> bool {
        self.prot & libc::PROT_EXEC != 0
    }
    pub fn is_read(&self) -> bool {
        self.prot & libc::PROT_READ != 0
    }
}

fn format_prot_flags(prot: i32, flags: i32) -> String {
    let mut res = String::new();
    res.push(if prot & libc::PROT_READ != 0 { 'r' } else { '-' });
    res.push(if prot & libc::PROT_WRITE != 0 { 'w' } else { '-' });
    res.push(if prot & libc::PROT_EXEC != 0 { 'x' } else { '-' });
    if flags & libc::MAP_SHARED != 0 {
        res.push('s');
    } else if flags & libc::MAP_PRIVATE != 0 {
        res.push('p');
    } else {
        res.push('-');
    }
    res
}

impl std::fmt::Debug for ProcMapsEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut res = String::new();
        let fp = match &self.file {
            Some(path) => String::from(path.to_str().unwrap_or("")),
            None => String::new(),
        };
        let s = format!(
            "{:x}-{:x} {} {:08x} {:02x}:{:02x} {}",
            self.base,
            self.base + self.size,
            &format_prot_flags(self.prot, self.flags),
            self.offset,
            self.dev.wrapping_shr(8),
            self.dev & 0xff,
            self.inode
        );
        res.push_str(&s);
        (0..=72usize.saturating_sub(s.len())).for_each(|_| res.push(' '));
        res.push_str(&fp);
        write!(f, "{}", res)
    }
}

fn hex_value<I>() -> impl Parser<Input = I, Output = u64>
where
    I: Stream<Item = char>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    many1::<String, _>(hex_digit()).map(|s| u64::from_str_radix(&s, 16).unwrap_or(0))
}

fn dec_value<I>() -> impl Parser<Input = I, Output = u64>
where
    I: Stream<Item = char>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    many1::<String, _>(hex_digit()).map(|s| s.parse::<u64>().unwrap_or(0))
}

fn dev<I>() -> impl Parser<Input = I, Output = i32>
where
    I: Stream<Item = char>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    (
        spaces(),
        count::<String, _>(2, hex_digit()),
        char(':'),
        count::<String, _>(2, hex_digit()),
    )
        .map(|(_, major, _, minor)| {
            i32::from_str_radix(&major, 16).unwrap_or(0) * 256
                + i32::from_str_radix(&minor, 16).unwrap_or(0)
        })
}

fn prot<I>() -> impl Parser<Input = I, Output = (i32, i32)>
where
    I: Stream<Item = char>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    (
        spaces(),
        choice([char('-'), char('r')]),
        choice([char('-'), char('w')]),
        choice([char('-'), char('x')]),
        choice([char('-'), char('s'), char('p')]),
    )
        .map(|(_, r, w, x, p)| {
            let mut prot: i32 = 0;
            let mut flags: i32 = 0;
            if r == 'r' {
                prot |= libc::PROT_READ;
            }
            if w == 'w' {
                prot |= libc::PROT_WRITE;
            }
            if x == 'x' {
                prot |= libc::PROT_EXEC;
            }
            if p == 'p' {
                flags |= libc::MAP_PRIVATE;
            } else if p == 's' {
                flags |= libc::MAP_SHARED;
            }
            (prot, flags)
        })
}

fn filepath<I>() -> impl Parser<Input = I, Output = Option<PathBuf>>
where
    I: Stream<Item = char>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    (
        spaces(),
        optional(many1::<String, _>(none_of("\r\n".chars()))),
    )
        .map(|(_, path)| path.map(PathBuf::from))
}

fn parser<I>() -> impl Parser<Input = I, Output = ProcMapsEntry>
where
    I: Stream<Item = char>,
    I::Error: ParseError<I::Item, I::Range, I::Position>,
{
    (
        hex_value(),
        char('-'),
        hex_value(),
        prot(),
        spaces(),
        hex_value(),
        dev(),
        spaces(),
        dec_value(),
        filepath(),
    )
        .map(
            |(from, _, to, (prot_val, flags_val), _, offset, devno, _, inode, path)| {
                ProcMapsEntry {
                    base: from,
                    size: to - from,
                    prot: prot_val,
                    flags: flags_val,
                    offset,
                    dev: devno,
                    inode,
                    file: path,
                }
            },
        )
}

fn parse_proc_maps_entry(line: &str) -> Result<ProcMapsEntry> {
    match parser().easy_parse(line) {
        Ok((result, _)) => Ok(result),
        Err(parse_error) => Err(Error::new(
            ErrorKind::Other,
            format!("parse error: {}", parse_error),
        )),
    }
}

pub fn decode_self_maps() -> Result<Vec<ProcMapsEntry>> {
    let mut file = File::open("/proc/self/maps")?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    contents
        .lines()
        .map(parse_proc_maps_entry)
        .collect::<Result<Vec<_>>>()
}

#[test]
fn can_decode_proc_self_maps() -> Result<()> {
    let decoded = decode_self_maps()?;
    assert!(!decoded.is_empty());
    Ok(())
}

#[test]
fn at_least_one_entry_is_executable() -> Result<()> {
    let decoded = decode_self_maps()?;
    assert!(decoded.iter().any(|e| e.is_exec()));
    Ok(())
}
