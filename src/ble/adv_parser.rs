//! Advertisement payload parsing.
//!
//! The payload is a run of `[len][type][data; len - 1]` structures. A zero
//! length ends the payload, and so does a structure whose declared length
//! runs past the buffer: its bytes are never handed out.

use heapless::String;

/// AD type: Shortened Local Name.
pub const AD_TYPE_NAME_SHORTENED: u8 = 0x08;
/// AD type: Complete Local Name.
pub const AD_TYPE_NAME_COMPLETE: u8 = 0x09;

/// One AD structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdElement<'a> {
    pub ad_type: u8,
    /// Exactly the declared `len - 1` bytes, always inside the buffer.
    pub data: &'a [u8],
}

/// Iterator over the AD structures of a payload.
#[derive(Clone, Debug)]
pub struct AdElements<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AdElements<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for AdElements<'a> {
    type Item = AdElement<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.pos;
        let len = *self.data.get(i)? as usize;
        if len == 0 || i + len >= self.data.len() {
            self.pos = self.data.len();
            return None;
        }
        self.pos = i + len + 1;
        Some(AdElement {
            ad_type: self.data[i + 1],
            data: &self.data[i + 2..i + 1 + len],
        })
    }
}

/// What a [`parse`] callback wants next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseControl {
    Continue,
    Stop,
}

/// Outcome of [`match_complete_name`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NameMatch {
    Accept,
    Reject,
}

/// Walk the payload, handing each element to `f` until it asks to stop.
///
/// Returns `true` if `f` stopped the walk, `false` if the payload ran out.
pub fn parse<'a, F>(data: &'a [u8], mut f: F) -> bool
where
    F: FnMut(AdElement<'a>) -> ParseControl,
{
    for element in AdElements::new(data) {
        if f(element) == ParseControl::Stop {
            return true;
        }
    }
    false
}

/// Look for a Complete Local Name element matching `target`.
///
/// Stops at the first match. Other element types and non-matching names
/// keep the walk going.
pub fn match_complete_name(data: &[u8], target: &[u8]) -> NameMatch {
    let found = parse(data, |element| {
        if element.ad_type == AD_TYPE_NAME_COMPLETE && name_matches(element.data, target) {
            ParseControl::Stop
        } else {
            ParseControl::Continue
        }
    });

    if found {
        NameMatch::Accept
    } else {
        NameMatch::Reject
    }
}

/// Compare the declared name against `target` over the shorter of the two
/// lengths. An empty name never matches. Declared bytes past the end of
/// `target` are mismatches, as they would be against its terminator.
fn name_matches(declared: &[u8], target: &[u8]) -> bool {
    if declared.is_empty() {
        return false;
    }
    let n = declared.len().min(target.len());
    n == declared.len() && declared[..n] == target[..n]
}

/// Extract complete/shortened local name from advertisement data.
pub fn extract_device_name(data: &[u8]) -> String<32> {
    let element = AdElements::new(data).find(|e| {
        e.ad_type == AD_TYPE_NAME_SHORTENED || e.ad_type == AD_TYPE_NAME_COMPLETE
    });

    let mut name = String::new();
    match element {
        Some(e) => {
            for &b in e.data {
                if name.push(b as char).is_err() {
                    break;
                }
            }
        }
        None => {
            let _ = name.push_str("Unknown");
        }
    }
    name
}
