//! XML dictionary: a bidirectional mapping between `(tag, num, tagEnd)`
//! triples and symbolic names, parsed from a small subset of the format
//! used by `EvioXMLDictionary`. Recognizes `<xmlDict>`, `<dictEntry>` (and
//! the legacy alias `<xmldumpDictEntry>`), `<bank>`, `<leaf>`, and
//! `<description>`.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Error, Result};

/// A dictionary entry's `num` attribute: either a fixed value or `%n`,
/// meaning "deferred to the event's own num at lookup time".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumSpec {
    Fixed(u8),
    Deferred,
}

/// One parsed `<dictEntry>`/`<bank>`/`<leaf>`, after tag-range expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct DictEntry {
    pub name: String,
    pub tag: u16,
    pub tag_end: Option<u16>,
    pub num: NumSpec,
    pub data_type: Option<String>,
    pub description: Option<String>,
}

/// Key used to look entries up by `(tag, num)`. `num` is `None` for
/// entries whose `num` attribute was `%n` — those match any num at the
/// tag/tagEnd they declare.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TagNumKey {
    tag: u16,
    num: Option<u8>,
}

pub struct Dictionary {
    entries: Vec<DictEntry>,
    by_name: HashMap<String, usize>,
    by_tag_num: HashMap<TagNumKey, usize>,
}

impl Dictionary {
    pub fn parse(xml: &str) -> Result<Dictionary> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut entries = Vec::new();
        let mut name_stack: Vec<String> = Vec::new();
        // Indices into `entries` for every entry still open (a `<bank>`,
        // `<dictEntry>`, or `<leaf>` seen as `Event::Start` rather than
        // `Event::Empty`) — a nested `<description>` attaches to whichever
        // of these was pushed most recently.
        let mut open_entries: Vec<usize> = Vec::new();
        let mut in_description = false;
        let mut description_text = String::new();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Eof) => break,
                Ok(Event::Start(tag)) => {
                    let local = local_name(&tag);
                    if local == "description" {
                        in_description = true;
                        description_text.clear();
                    } else if local == "bank" {
                        let entry = parse_entry(&tag, &name_stack)?;
                        name_stack.push(entry.name.clone());
                        open_entries.push(entries.len());
                        entries.push(entry);
                    } else if local == "dictEntry" || local == "xmldumpDictEntry" || local == "leaf" {
                        let entry = parse_entry(&tag, &name_stack)?;
                        open_entries.push(entries.len());
                        entries.push(entry);
                    }
                    // <xmlDict> and unrecognized containers are transparent.
                }
                Ok(Event::Empty(tag)) => {
                    let local = local_name(&tag);
                    if local == "dictEntry" || local == "xmldumpDictEntry" || local == "bank" || local == "leaf" {
                        entries.push(parse_entry(&tag, &name_stack)?);
                    }
                }
                Ok(Event::Text(text)) => {
                    if in_description {
                        let decoded = text
                            .unescape()
                            .map_err(|e| Error::DictionaryParseError(e.to_string()))?;
                        description_text.push_str(&decoded);
                    }
                }
                Ok(Event::End(tag)) => {
                    let local = local_name_closing(&tag);
                    if local == "description" {
                        in_description = false;
                        if let Some(&idx) = open_entries.last() {
                            entries[idx].description = Some(description_text.trim().to_string());
                        }
                        description_text.clear();
                    } else if local == "bank" {
                        name_stack.pop();
                        open_entries.pop();
                    } else if local == "dictEntry" || local == "xmldumpDictEntry" || local == "leaf" {
                        open_entries.pop();
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(Error::DictionaryParseError(format!(
                        "xml parse error: {e}"
                    )))
                }
            }
            buf.clear();
        }

        build(entries)
    }

    pub fn entries(&self) -> &[DictEntry] {
        &self.entries
    }

    pub fn entry_from_name(&self, name: &str) -> Option<&DictEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// `nameFromTagNumType`: looks up the name for an exact `(tag, num)`
    /// pair, falling back to a `%n`-deferred entry whose tag (or tag range)
    /// covers `tag`.
    pub fn name_from_tag_num(&self, tag: u16, num: u8) -> Option<&str> {
        if let Some(&i) = self.by_tag_num.get(&TagNumKey {
            tag,
            num: Some(num),
        }) {
            return Some(&self.entries[i].name);
        }
        self.by_tag_num
            .get(&TagNumKey { tag, num: None })
            .map(|&i| self.entries[i].name.as_str())
    }
}

fn local_name(tag: &quick_xml::events::BytesStart) -> String {
    String::from_utf8_lossy(tag.local_name().as_ref()).into_owned()
}

fn local_name_closing(tag: &quick_xml::events::BytesEnd) -> String {
    String::from_utf8_lossy(tag.local_name().as_ref()).into_owned()
}

fn attr_value(tag: &quick_xml::events::BytesStart, key: &str) -> Result<Option<String>> {
    for attr in tag.attributes() {
        let attr = attr.map_err(|e| Error::DictionaryParseError(e.to_string()))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|e| Error::DictionaryParseError(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Splits a `tag` attribute of the form `"5"` or `"5-7"` into `(tag, tag_end)`.
fn parse_tag_range(raw: &str) -> Result<(u16, Option<u16>)> {
    if let Some((lo, hi)) = raw.split_once('-') {
        let lo: u16 = lo
            .trim()
            .parse()
            .map_err(|_| Error::DictionaryParseError(format!("bad tag range: {raw}")))?;
        let hi: u16 = hi
            .trim()
            .parse()
            .map_err(|_| Error::DictionaryParseError(format!("bad tag range: {raw}")))?;
        Ok((lo, Some(hi)))
    } else {
        let tag: u16 = raw
            .trim()
            .parse()
            .map_err(|_| Error::DictionaryParseError(format!("bad tag: {raw}")))?;
        Ok((tag, None))
    }
}

fn parse_num(raw: &str) -> Result<NumSpec> {
    if raw.trim() == "%n" {
        Ok(NumSpec::Deferred)
    } else {
        raw.trim()
            .parse::<u8>()
            .map(NumSpec::Fixed)
            .map_err(|_| Error::DictionaryParseError(format!("bad num: {raw}")))
    }
}

fn parse_entry(tag: &quick_xml::events::BytesStart, name_stack: &[String]) -> Result<DictEntry> {
    let own_name = attr_value(tag, "name")?
        .ok_or_else(|| Error::DictionaryParseError("entry missing name attribute".into()))?;
    let tag_attr = attr_value(tag, "tag")?
        .ok_or_else(|| Error::DictionaryParseError(format!("entry {own_name} missing tag attribute")))?;
    let (tag_value, tag_end) = parse_tag_range(&tag_attr)?;
    let num = match attr_value(tag, "num")? {
        Some(raw) => parse_num(&raw)?,
        None => NumSpec::Deferred,
    };
    let data_type = attr_value(tag, "type")?;
    // Descriptions are a nested `<description>` child element with text
    // content, not an attribute; filled in by the caller's event loop if
    // one follows this entry's start tag.
    let description = None;

    let name = if name_stack.is_empty() {
        own_name
    } else {
        format!("{}.{}", name_stack.join("."), own_name)
    };

    Ok(DictEntry {
        name,
        tag: tag_value,
        tag_end,
        num,
        data_type,
        description,
    })
}

/// Expands tag ranges into one `(tag, num)` key per tag value, then
/// rejects any duplicate key: duplicate tag/num tuples after range
/// expansion are an error rather than a silent overwrite.
fn build(entries: Vec<DictEntry>) -> Result<Dictionary> {
    let mut by_name = HashMap::new();
    let mut by_tag_num = HashMap::new();

    for (i, entry) in entries.iter().enumerate() {
        by_name.insert(entry.name.clone(), i);

        let hi = entry.tag_end.unwrap_or(entry.tag);
        for t in entry.tag..=hi {
            let num = match entry.num {
                NumSpec::Fixed(n) => Some(n),
                NumSpec::Deferred => None,
            };
            let key = TagNumKey { tag: t, num };
            if by_tag_num.insert(key, i).is_some() {
                return Err(Error::DictionaryParseError(format!(
                    "duplicate (tag={t}, num={:?}) after range expansion",
                    entry.num
                )));
            }
        }
    }

    Ok(Dictionary {
        entries,
        by_name,
        by_tag_num,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_dict_entry() {
        let xml = r#"<xmlDict><dictEntry name="A" tag="1" num="0"/></xmlDict>"#;
        let dict = Dictionary::parse(xml).unwrap();
        assert_eq!(dict.name_from_tag_num(1, 0), Some("A"));
        assert!(dict.entry_from_name("A").is_some());
    }

    #[test]
    fn tag_range_expands_and_resolves() {
        let xml = r#"<xmlDict><dictEntry name="X" tag="5-7" num="0"/></xmlDict>"#;
        let dict = Dictionary::parse(xml).unwrap();
        assert_eq!(dict.name_from_tag_num(6, 0), Some("X"));
        assert_eq!(dict.name_from_tag_num(5, 0), Some("X"));
        assert_eq!(dict.name_from_tag_num(7, 0), Some("X"));
        assert_eq!(dict.name_from_tag_num(8, 0), None);
    }

    #[test]
    fn hierarchical_names_are_dotted() {
        let xml = r#"<xmlDict>
            <bank name="HallD" tag="1">
                <bank name="DC" tag="2">
                    <leaf name="xpos" tag="3" num="1"/>
                </bank>
            </bank>
        </xmlDict>"#;
        let dict = Dictionary::parse(xml).unwrap();
        assert!(dict.entry_from_name("HallD.DC.xpos").is_some());
        assert_eq!(dict.name_from_tag_num(3, 1), Some("HallD.DC.xpos"));
    }

    #[test]
    fn deferred_num_matches_any_num() {
        let xml = r#"<xmlDict><dictEntry name="Wild" tag="9" num="%n"/></xmlDict>"#;
        let dict = Dictionary::parse(xml).unwrap();
        assert_eq!(dict.name_from_tag_num(9, 42), Some("Wild"));
        assert_eq!(dict.name_from_tag_num(9, 0), Some("Wild"));
    }

    #[test]
    fn duplicate_tuple_after_range_expansion_is_rejected() {
        let xml = r#"<xmlDict>
            <dictEntry name="A" tag="1-3" num="0"/>
            <dictEntry name="B" tag="2" num="0"/>
        </xmlDict>"#;
        assert!(matches!(
            Dictionary::parse(xml),
            Err(Error::DictionaryParseError(_))
        ));
    }

    #[test]
    fn nested_description_element_is_captured() {
        let xml = r#"<xmlDict>
            <bank name="HallD" tag="6-8" type="bank">
                <description format="New Format">hall_d_tag_range</description>
                <leaf name="xpos" tag="6" num="5"/>
            </bank>
            <dictEntry name="SEG5" tag="5">
                <description format="Old Format">tag 5 description</description>
            </dictEntry>
        </xmlDict>"#;
        let dict = Dictionary::parse(xml).unwrap();
        assert_eq!(
            dict.entry_from_name("HallD").unwrap().description.as_deref(),
            Some("hall_d_tag_range")
        );
        assert_eq!(
            dict.entry_from_name("SEG5").unwrap().description.as_deref(),
            Some("tag 5 description")
        );
        // A sibling leaf with no <description> of its own stays None.
        assert_eq!(
            dict.entry_from_name("HallD.xpos").unwrap().description,
            None
        );
    }

    #[test]
    fn legacy_xmldump_alias_is_accepted() {
        let xml = r#"<xmlDict><xmldumpDictEntry name="Legacy" tag="4" num="0"/></xmlDict>"#;
        let dict = Dictionary::parse(xml).unwrap();
        assert_eq!(dict.name_from_tag_num(4, 0), Some("Legacy"));
    }
}
