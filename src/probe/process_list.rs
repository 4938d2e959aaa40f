//! System process list walking and the debugger watch-list.

use std::collections::BTreeSet;

use crate::probe::error::ProbeError;
use crate::probe::layout::PointerWidth;

/// Known debugger / disassembler executables.
pub const DEFAULT_WATCHLIST: &[&str] = &[
    // OllyDbg v1/v2
    "ollydbg.exe",
    // IDA Pro 5/6
    "idaq.exe",
    "idaq64.exe",
    // IDA Pro 7+
    "ida.exe",
    "ida64.exe",
    "idat.exe",
    "idat64.exe",
    // x64dbg
    "x32dbg.exe",
    "x64dbg.exe",
];

/// Image names the process-list probes look for. Matching is exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watchlist {
    names: BTreeSet<String>,
}

impl Watchlist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Watchlist {
            names: names
                .into_iter()
                .map(Into::into)
                .filter(|n: &String| !n.is_empty())
                .collect(),
        }
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names
            .extend(names.into_iter().map(Into::into).filter(|n: &String| !n.is_empty()));
    }

    pub fn contains(&self, image: &str) -> bool {
        self.names.contains(image)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for Watchlist {
    fn default() -> Self {
        Watchlist::new(DEFAULT_WATCHLIST.iter().copied())
    }
}

// SYSTEM_PROCESS_INFORMATION
const NEXT_ENTRY_OFFSET: usize = 0x00;
const IMAGE_NAME: usize = 0x38;

fn image_name_buffer(width: PointerWidth) -> usize {
    // UNICODE_STRING { USHORT Length; USHORT MaximumLength; PWSTR Buffer; }
    IMAGE_NAME + width.bytes()
}

/// Iterator over image names in a `SystemProcessInformation` style buffer.
///
/// `base` is the address the buffer had when the OS filled it: the kernel
/// stores absolute pointers to names it copied into the same buffer.
pub struct ProcessRecords<'a> {
    buf: &'a [u8],
    base: u64,
    width: PointerWidth,
    cursor: Option<usize>,
}

impl<'a> ProcessRecords<'a> {
    pub fn new(buf: &'a [u8], base: u64, width: PointerWidth) -> Self {
        ProcessRecords {
            buf,
            base,
            width,
            cursor: if buf.is_empty() { None } else { Some(0) },
        }
    }

    fn record_at(&self, at: usize) -> Result<(String, u32), ProbeError> {
        let malformed = || ProbeError::Malformed { what: "process record" };
        let header_end = image_name_buffer(self.width) + self.width.bytes();
        let record = self
            .buf
            .get(at..)
            .filter(|r| r.len() >= header_end)
            .ok_or_else(malformed)?;

        let next = u32::from_le_bytes(record[NEXT_ENTRY_OFFSET..NEXT_ENTRY_OFFSET + 4].try_into().map_err(|_| malformed())?);
        let length = u16::from_le_bytes([record[IMAGE_NAME], record[IMAGE_NAME + 1]]) as usize;
        let pointer = self.width.read_pointer(&record[image_name_buffer(self.width)..]);

        if pointer == 0 || length == 0 {
            return Ok((String::new(), next));
        }

        let start = pointer
            .checked_sub(self.base)
            .map(|o| o as usize)
            .ok_or(ProbeError::Malformed { what: "process image name" })?;
        let raw = self
            .buf
            .get(start..start + (length & !1))
            .ok_or(ProbeError::Malformed { what: "process image name" })?;
        let wide: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();

        Ok((String::from_utf16_lossy(&wide), next))
    }
}

impl Iterator for ProcessRecords<'_> {
    type Item = Result<String, ProbeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let at = self.cursor?;
        match self.record_at(at) {
            Ok((name, next)) => {
                // the terminal record has a zero link
                self.cursor = if next == 0 { None } else { Some(at + next as usize) };
                Some(Ok(name))
            }
            Err(e) => {
                self.cursor = None;
                Some(Err(e))
            }
        }
    }
}

/// First watch-listed image name in the list, if any.
pub fn find_watched(
    buf: &[u8],
    base: u64,
    width: PointerWidth,
    watchlist: &Watchlist,
) -> Result<Option<String>, ProbeError> {
    for name in ProcessRecords::new(buf, base, width) {
        let name = name?;
        if watchlist.contains(&name) {
            return Ok(Some(name));
        }
    }
    Ok(None)
}
