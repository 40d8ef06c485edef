//! Occurrence expander.
//!
//! Turns a raw iCalendar document into the concrete [`SourceOccurrence`]s that
//! overlap the sync window:
//!
//! - `VALUE=DATE` entries become all-day occurrences starting at midnight UTC
//! - `TZID` times are resolved with `chrono-tz`; unknown zones and floating
//!   times are read as UTC
//! - `RRULE` is expanded with the `rrule` crate, `EXDATE` removes instances and
//!   `RDATE` adds them
//! - a VEVENT carrying `RECURRENCE-ID` replaces the instance it names
//! - `STATUS:CANCELLED` masters and instances are dropped
//!
//! A malformed VEVENT is logged and counted in [`Expansion::skipped`]; the rest
//! of the document is still expanded.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use icalendar::parser::{self, Property, read_calendar, unfold};
use icsbridge_core::{SourceOccurrence, SyncWindow, Transparency, date_to_utc, key_of};
use rrule::RRuleSet;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};

/// Upper bound on instances generated per recurring definition.
const MAX_INSTANCES: u16 = 2048;

/// The result of expanding one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    /// Occurrences overlapping the window, ordered by start then key.
    pub occurrences: Vec<SourceOccurrence>,
    /// Malformed VEVENTs that were skipped.
    pub skipped: usize,
}

/// Expands `document` into the occurrences that overlap `window`.
///
/// # Errors
///
/// Fails only when the document as a whole cannot be parsed.
pub fn expand(document: &str, window: &SyncWindow) -> ProviderResult<Expansion> {
    if !document.contains("BEGIN:VCALENDAR") {
        return Err(ProviderError::feed("document is not an iCalendar document").with_provider("ics"));
    }

    let unfolded = unfold(document);
    let calendar = read_calendar(&unfolded).map_err(|e| {
        ProviderError::feed(format!("unparseable calendar: {}", e)).with_provider("ics")
    })?;

    let mut vevents = Vec::new();
    collect_vevents(&calendar.components, &mut vevents);

    let mut expander = Expander::new(*window);
    let mut masters = Vec::new();
    let mut overrides = Vec::new();

    for component in vevents {
        match parse_event(component) {
            Ok(event) if event.recurrence_id.is_some() => overrides.push(event),
            Ok(event) => masters.push(event),
            Err(reason) => {
                let uid = component
                    .find_prop("UID")
                    .map(|p| p.val.to_string())
                    .unwrap_or_default();
                expander.skip(&uid, &reason);
            }
        }
    }

    expander.run(masters, overrides);
    Ok(expander.finish())
}

fn collect_vevents<'a, 'b>(
    components: &'b [parser::Component<'a>],
    out: &mut Vec<&'b parser::Component<'a>>,
) {
    for component in components {
        if component.name == "VEVENT" {
            out.push(component);
        } else if component.name == "VCALENDAR" {
            collect_vevents(&component.components, out);
        }
    }
}

/// A time value as written in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IcsTime {
    Date(NaiveDate),
    Utc(DateTime<Utc>),
    Floating(NaiveDateTime),
    Zoned {
        datetime: NaiveDateTime,
        tzid: String,
    },
}

impl IcsTime {
    fn is_date(&self) -> bool {
        matches!(self, Self::Date(_))
    }
}

/// One VEVENT, before expansion.
#[derive(Debug, Clone)]
struct ParsedEvent {
    uid: String,
    start: IcsTime,
    end: Option<IcsTime>,
    duration: Option<Duration>,
    title: String,
    location: Option<String>,
    description: Option<String>,
    transparency: Transparency,
    cancelled: bool,
    rrule: Option<String>,
    exdates: Vec<IcsTime>,
    rdates: Vec<IcsTime>,
    recurrence_id: Option<IcsTime>,
}

fn parse_event(component: &parser::Component<'_>) -> Result<ParsedEvent, String> {
    let uid = component
        .find_prop("UID")
        .map(|p| p.val.as_ref().trim().to_string())
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| "missing UID".to_string())?;

    let start = component
        .find_prop("DTSTART")
        .ok_or_else(|| "missing DTSTART".to_string())
        .and_then(|p| single_time(p, "DTSTART"))?;

    let end = component
        .find_prop("DTEND")
        .map(|p| single_time(p, "DTEND"))
        .transpose()?;

    let duration = component
        .find_prop("DURATION")
        .map(|p| {
            parse_duration(p.val.as_ref().trim())
                .ok_or_else(|| format!("invalid DURATION {:?}", p.val.as_ref()))
        })
        .transpose()?;

    let recurrence_id = component
        .find_prop("RECURRENCE-ID")
        .map(|p| single_time(p, "RECURRENCE-ID"))
        .transpose()?;

    let status = component
        .find_prop("STATUS")
        .map(|p| p.val.as_ref().trim().to_ascii_uppercase());
    let cancelled = matches!(status.as_deref(), Some("CANCELLED" | "CANCELED"));

    let transp = component
        .find_prop("TRANSP")
        .map(|p| p.val.as_ref().trim().to_ascii_uppercase());
    let busy_status = component
        .find_prop("X-MICROSOFT-CDO-BUSYSTATUS")
        .map(|p| p.val.as_ref().trim().to_ascii_uppercase());
    let transparency = if transp.as_deref() == Some("TRANSPARENT")
        || busy_status.as_deref() == Some("FREE")
    {
        Transparency::Transparent
    } else {
        Transparency::Opaque
    };

    let mut exdates = Vec::new();
    let mut rdates = Vec::new();
    for prop in &component.properties {
        if prop.name == "EXDATE" {
            exdates.extend(parse_times(prop, "EXDATE")?);
        } else if prop.name == "RDATE" {
            rdates.extend(parse_times(prop, "RDATE")?);
        }
    }

    Ok(ParsedEvent {
        uid,
        start,
        end,
        duration,
        title: text_value(component, "SUMMARY").unwrap_or_default(),
        location: text_value(component, "LOCATION"),
        description: text_value(component, "DESCRIPTION"),
        transparency,
        cancelled,
        rrule: component
            .find_prop("RRULE")
            .map(|p| p.val.as_ref().trim().to_string()),
        exdates,
        rdates,
        recurrence_id,
    })
}

fn text_value(component: &parser::Component<'_>, name: &str) -> Option<String> {
    component
        .find_prop(name)
        .map(|p| unescape_text(p.val.as_ref()))
}

/// Reverses RFC 5545 TEXT escaping.
fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn param<'p>(prop: &'p Property<'_>, key: &str) -> Option<&'p str> {
    prop.params
        .iter()
        .find(|p| p.key == key)
        .and_then(|p| p.val.as_ref().map(|v| v.as_ref()))
}

fn single_time(prop: &Property<'_>, name: &str) -> Result<IcsTime, String> {
    parse_times(prop, name)?
        .into_iter()
        .next()
        .ok_or_else(|| format!("empty {}", name))
}

/// Parses a date/date-time property, including comma-separated lists and
/// `VALUE=PERIOD` entries (only the period start is kept).
fn parse_times(prop: &Property<'_>, name: &str) -> Result<Vec<IcsTime>, String> {
    let tzid = param(prop, "TZID").map(|tz| tz.trim_matches('"').to_string());
    let is_date = param(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"));

    prop.val
        .as_ref()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|value| {
            let value = value.split_once('/').map_or(value, |(start, _)| start);
            parse_time_value(value, is_date, tzid.as_deref())
                .ok_or_else(|| format!("invalid {} value {:?}", name, value))
        })
        .collect()
}

fn parse_time_value(value: &str, is_date: bool, tzid: Option<&str>) -> Option<IcsTime> {
    if is_date || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit())) {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .map(IcsTime::Date);
    }

    if let Some(utc) = value.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .ok()
            .map(|dt| IcsTime::Utc(dt.and_utc()));
    }

    let datetime = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    Some(match tzid {
        Some(tzid) => IcsTime::Zoned {
            datetime,
            tzid: tzid.to_string(),
        },
        None => IcsTime::Floating(datetime),
    })
}

/// Parses an RFC 5545 DURATION such as `PT1H30M`, `P1D` or `-P1W`.
///
/// Values that do not fit the time range are rejected like malformed ones.
fn parse_duration(raw: &str) -> Option<Duration> {
    let (negative, rest) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let parsed = iso8601::duration(rest).ok()?;
    let length = Duration::from_std(parsed.into()).ok()?;
    Some(if negative { -length } else { length })
}

/// End of an instance starting at `start`.
fn end_of(start: DateTime<Utc>, length: Duration) -> Result<DateTime<Utc>, String> {
    start
        .checked_add_signed(length)
        .ok_or_else(|| "event end out of range".to_string())
}

/// Resolves a TZID to a `chrono-tz` zone, tolerating the `/Region/City`
/// spelling some producers emit.
fn resolve_zone(tzid: &str) -> Option<chrono_tz::Tz> {
    tzid.trim_start_matches('/').parse::<chrono_tz::Tz>().ok()
}

/// Converts a zoned wall-clock time to UTC. Times inside a DST gap are moved
/// forward by an hour; ambiguous times take the earlier instant.
fn local_to_utc(tz: chrono_tz::Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            naive
                .checked_add_signed(Duration::hours(1))
                .and_then(|shifted| tz.from_local_datetime(&shifted).earliest())
        })
        .map_or_else(|| naive.and_utc(), |dt| dt.with_timezone(&Utc))
}

/// Rewrites `UNTIL` to a UTC date-time, the only form the recurrence engine
/// accepts for every DTSTART flavour.
fn normalize_rrule(rule: &str) -> String {
    rule.split(';')
        .map(|part| match part.split_once('=') {
            Some((name, value)) if name.eq_ignore_ascii_case("UNTIL") => {
                if value.len() == 8 {
                    format!("UNTIL={}T235959Z", value)
                } else if !value.ends_with('Z') {
                    format!("UNTIL={}Z", value)
                } else {
                    part.to_string()
                }
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Per-document expansion state.
struct Expander {
    window: SyncWindow,
    occurrences: Vec<SourceOccurrence>,
    skipped: usize,
    unknown_zones: HashSet<String>,
}

impl Expander {
    fn new(window: SyncWindow) -> Self {
        Self {
            window,
            occurrences: Vec::new(),
            skipped: 0,
            unknown_zones: HashSet::new(),
        }
    }

    fn skip(&mut self, uid: &str, reason: &str) {
        warn!(uid = %uid, reason = %reason, "skipping malformed calendar entry");
        self.skipped += 1;
    }

    fn to_utc(&mut self, time: &IcsTime) -> DateTime<Utc> {
        match time {
            IcsTime::Date(date) => date_to_utc(*date),
            IcsTime::Utc(dt) => *dt,
            IcsTime::Floating(naive) => naive.and_utc(),
            IcsTime::Zoned { datetime, tzid } => match resolve_zone(tzid) {
                Some(tz) => local_to_utc(tz, *datetime),
                None => {
                    if self.unknown_zones.insert(tzid.clone()) {
                        warn!(tzid = %tzid, "unknown timezone, reading times as UTC");
                    }
                    datetime.and_utc()
                }
            },
        }
    }

    /// Length of each instance of `event`.
    fn instance_length(&mut self, event: &ParsedEvent) -> Result<Duration, String> {
        let length = match (&event.end, event.duration) {
            (Some(end), _) => {
                let start = self.to_utc(&event.start);
                self.to_utc(end) - start
            }
            (None, Some(duration)) => duration,
            (None, None) if event.start.is_date() => Duration::days(1),
            (None, None) => Duration::zero(),
        };
        if length < Duration::zero() {
            return Err("event ends before it starts".to_string());
        }
        Ok(length)
    }

    fn run(&mut self, masters: Vec<ParsedEvent>, overrides: Vec<ParsedEvent>) {
        let cancelled_series: HashSet<String> = masters
            .iter()
            .filter(|m| m.cancelled && m.rrule.is_some())
            .map(|m| m.uid.clone())
            .collect();

        // Instances replaced by an override, cancelled or not.
        let mut replaced: HashMap<String, HashSet<DateTime<Utc>>> = HashMap::new();
        let mut live_overrides = Vec::new();
        for event in overrides {
            let Some(recurrence_id) = event.recurrence_id.clone() else {
                continue;
            };
            let original = self.to_utc(&recurrence_id);
            replaced
                .entry(event.uid.clone())
                .or_default()
                .insert(original);
            if !event.cancelled && !cancelled_series.contains(&event.uid) {
                live_overrides.push((event, original));
            }
        }

        for master in masters {
            if master.cancelled {
                debug!(uid = %master.uid, "omitting cancelled event");
                continue;
            }
            let empty = HashSet::new();
            let skip_starts = replaced.get(&master.uid).unwrap_or(&empty);
            if let Err(reason) = self.expand_master(&master, skip_starts) {
                self.skip(&master.uid, &reason);
            }
        }

        for (event, original) in live_overrides {
            match self.instance_length(&event) {
                Ok(length) => {
                    let start = self.to_utc(&event.start);
                    match end_of(start, length) {
                        Ok(end) => self.push(&event, start, end, Some(original)),
                        Err(reason) => self.skip(&event.uid, &reason),
                    }
                }
                Err(reason) => self.skip(&event.uid, &reason),
            }
        }
    }

    fn expand_master(
        &mut self,
        master: &ParsedEvent,
        replaced: &HashSet<DateTime<Utc>>,
    ) -> Result<(), String> {
        let length = self.instance_length(master)?;
        let first = self.to_utc(&master.start);

        let mut starts = BTreeSet::new();
        match &master.rrule {
            Some(rule) => starts.extend(self.recurrence_starts(master, rule, length)?),
            None => {
                starts.insert(first);
            }
        }
        for rdate in &master.rdates {
            let start = self.to_utc(rdate);
            starts.insert(start);
        }

        let mut excluded_instants = HashSet::new();
        let mut excluded_dates = HashSet::new();
        for exdate in &master.exdates {
            match exdate {
                IcsTime::Date(date) => {
                    excluded_dates.insert(*date);
                }
                other => {
                    let instant = self.to_utc(other);
                    excluded_instants.insert(instant);
                }
            }
        }

        for start in starts {
            if excluded_instants.contains(&start)
                || excluded_dates.contains(&start.date_naive())
                || replaced.contains(&start)
            {
                continue;
            }
            let end = end_of(start, length)?;
            self.push(master, start, end, None);
        }
        Ok(())
    }

    /// Expands `rule` into the instance starts that can overlap the window.
    fn recurrence_starts(
        &mut self,
        master: &ParsedEvent,
        rule: &str,
        length: Duration,
    ) -> Result<Vec<DateTime<Utc>>, String> {
        let dtstart = match &master.start {
            IcsTime::Date(date) => format!("DTSTART:{}T000000Z", date.format("%Y%m%d")),
            IcsTime::Utc(dt) => format!("DTSTART:{}", dt.format("%Y%m%dT%H%M%SZ")),
            IcsTime::Floating(naive) => format!("DTSTART:{}Z", naive.format("%Y%m%dT%H%M%S")),
            IcsTime::Zoned { datetime, tzid } => match resolve_zone(tzid) {
                Some(tz) => format!(
                    "DTSTART;TZID={}:{}",
                    tz.name(),
                    datetime.format("%Y%m%dT%H%M%S")
                ),
                None => format!("DTSTART:{}Z", datetime.format("%Y%m%dT%H%M%S")),
            },
        };

        let text = format!("{}\nRRULE:{}", dtstart, normalize_rrule(rule));
        let set: RRuleSet = text
            .parse()
            .map_err(|e| format!("invalid RRULE {:?}: {}", rule, e))?;

        // after/before are exclusive; widen by a second and by the instance
        // length so occurrences already running at window start are kept.
        let tz: rrule::Tz = Utc.into();
        let after = self
            .window
            .start
            .checked_sub_signed(length)
            .and_then(|t| t.checked_sub_signed(Duration::seconds(1)))
            .ok_or_else(|| "event length out of range".to_string())?
            .with_timezone(&tz);
        let before = (self.window.end + Duration::seconds(1)).with_timezone(&tz);
        let result = set.after(after).before(before).all(MAX_INSTANCES);
        if result.limited {
            warn!(uid = %master.uid, limit = MAX_INSTANCES, "recurrence expansion truncated");
        }

        Ok(result
            .dates
            .iter()
            .map(|dt| dt.with_timezone(&Utc))
            .collect())
    }

    fn push(
        &mut self,
        event: &ParsedEvent,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        recurrence_id: Option<DateTime<Utc>>,
    ) {
        if !self.window.overlaps(start, end) {
            return;
        }

        let mut occurrence = SourceOccurrence::new(&event.uid, start, end, &event.title)
            .with_all_day(event.start.is_date())
            .with_transparency(event.transparency);
        occurrence.location = event.location.clone();
        occurrence.description = event.description.clone();
        occurrence.recurrence_id = recurrence_id;
        self.occurrences.push(occurrence);
    }

    fn finish(self) -> Expansion {
        // Dedupe in document order so the first definition wins, then sort.
        let mut seen = HashSet::new();
        let mut occurrences = Vec::with_capacity(self.occurrences.len());
        for occurrence in self.occurrences {
            let key = key_of(&occurrence);
            if seen.insert(key.clone()) {
                occurrences.push(occurrence);
            } else {
                warn!(key = %key, "duplicate occurrence, keeping the first definition");
            }
        }
        occurrences.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| key_of(a).cmp(&key_of(b))));

        Expansion {
            occurrences,
            skipped: self.skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icsbridge_core::stable_key;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    /// `[2025-02-28, 2025-03-31)`: now = 2025-03-01, lookback 1 day, lookahead 30 days.
    fn window() -> SyncWindow {
        SyncWindow::around(utc(2025, 3, 1, 0, 0), 1, 30)
    }

    fn calendar(events: &[&str]) -> String {
        let mut doc = String::from("BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:-//school//feed//EN\n");
        for event in events {
            doc.push_str("BEGIN:VEVENT\n");
            doc.push_str(event.trim());
            doc.push_str("\nEND:VEVENT\n");
        }
        doc.push_str("END:VCALENDAR\n");
        doc
    }

    fn weekly_maths() -> &'static str {
        "UID:maths@school\n\
         SUMMARY:Maths\n\
         DTSTART:20250303T090000Z\n\
         DTEND:20250303T100000Z\n\
         RRULE:FREQ=WEEKLY;COUNT=4"
    }

    #[test]
    fn weekly_rule_fans_out_to_distinct_keys() {
        let expansion = expand(&calendar(&[weekly_maths()]), &window()).unwrap();

        assert_eq!(expansion.occurrences.len(), 4);
        assert_eq!(expansion.skipped, 0);
        let keys: HashSet<_> = expansion.occurrences.iter().map(key_of).collect();
        assert_eq!(keys.len(), 4);

        let starts: Vec<_> = expansion.occurrences.iter().map(|o| o.start).collect();
        assert_eq!(
            starts,
            vec![
                utc(2025, 3, 3, 9, 0),
                utc(2025, 3, 10, 9, 0),
                utc(2025, 3, 17, 9, 0),
                utc(2025, 3, 24, 9, 0),
            ]
        );
        assert!(expansion.occurrences.iter().all(|o| o.end - o.start == Duration::hours(1)));
    }

    #[test]
    fn exdate_removes_instances() {
        let event = format!("{}\nEXDATE:20250310T090000Z,20250317T090000Z", weekly_maths());
        let expansion = expand(&calendar(&[&event]), &window()).unwrap();

        let starts: Vec<_> = expansion.occurrences.iter().map(|o| o.start).collect();
        assert_eq!(starts, vec![utc(2025, 3, 3, 9, 0), utc(2025, 3, 24, 9, 0)]);
    }

    #[test]
    fn rdate_adds_instances() {
        let event = "UID:trip@school\n\
                     SUMMARY:Trip\n\
                     DTSTART:20250303T090000Z\n\
                     DTEND:20250303T100000Z\n\
                     RDATE:20250305T090000Z";
        let expansion = expand(&calendar(&[event]), &window()).unwrap();
        assert_eq!(expansion.occurrences.len(), 2);
        assert_eq!(expansion.occurrences[1].start, utc(2025, 3, 5, 9, 0));
    }

    #[test]
    fn override_replaces_instance_and_keeps_identity() {
        let moved = "UID:maths@school\n\
                     SUMMARY:Maths (moved)\n\
                     RECURRENCE-ID:20250310T090000Z\n\
                     DTSTART:20250311T140000Z\n\
                     DTEND:20250311T150000Z";
        let expansion = expand(&calendar(&[weekly_maths(), moved]), &window()).unwrap();

        assert_eq!(expansion.occurrences.len(), 4);
        let moved = expansion
            .occurrences
            .iter()
            .find(|o| o.title == "Maths (moved)")
            .unwrap();
        assert_eq!(moved.start, utc(2025, 3, 11, 14, 0));
        assert_eq!(
            key_of(moved),
            stable_key("maths@school", utc(2025, 3, 10, 9, 0), false)
        );
        assert!(!expansion.occurrences.iter().any(|o| o.start == utc(2025, 3, 10, 9, 0)));
    }

    #[test]
    fn cancelled_entries_are_omitted() {
        let cancelled_instance = "UID:maths@school\n\
                                  RECURRENCE-ID:20250317T090000Z\n\
                                  DTSTART:20250317T090000Z\n\
                                  DTEND:20250317T100000Z\n\
                                  STATUS:CANCELLED";
        let cancelled_event = "UID:assembly@school\n\
                               SUMMARY:Assembly\n\
                               DTSTART:20250304T080000Z\n\
                               DTEND:20250304T083000Z\n\
                               STATUS:CANCELLED";
        let doc = calendar(&[weekly_maths(), cancelled_instance, cancelled_event]);
        let expansion = expand(&doc, &window()).unwrap();

        assert_eq!(expansion.occurrences.len(), 3);
        assert!(expansion.occurrences.iter().all(|o| o.uid == "maths@school"));
        assert!(!expansion.occurrences.iter().any(|o| o.start == utc(2025, 3, 17, 9, 0)));
    }

    #[test]
    fn malformed_entry_is_skipped_not_fatal() {
        let no_start = "UID:broken@school\nSUMMARY:Broken";
        let bad_date = "UID:bad@school\nSUMMARY:Bad\nDTSTART:2025-03-04";
        let good = "UID:ok@school\nSUMMARY:Fine\nDTSTART:20250304T120000Z\nDTEND:20250304T130000Z";
        let expansion = expand(&calendar(&[no_start, bad_date, good]), &window()).unwrap();

        assert_eq!(expansion.occurrences.len(), 1);
        assert_eq!(expansion.occurrences[0].uid, "ok@school");
        assert_eq!(expansion.skipped, 2);
    }

    #[test]
    fn out_of_range_duration_is_skipped() {
        let unparseable = "UID:big@school\nSUMMARY:Big\nDTSTART:20250304T090000Z\nDURATION:P9999999999999W";
        let past_calendar_end = "UID:huge@school\nSUMMARY:Huge\nDTSTART:20250304T090000Z\nDURATION:P4000000000W";
        let good = "UID:ok@school\nSUMMARY:Fine\nDTSTART:20250304T120000Z\nDTEND:20250304T130000Z";
        let expansion = expand(&calendar(&[unparseable, past_calendar_end, good]), &window()).unwrap();

        assert_eq!(expansion.occurrences.len(), 1);
        assert_eq!(expansion.occurrences[0].uid, "ok@school");
        assert_eq!(expansion.skipped, 2);
    }

    #[test]
    fn missing_uid_is_skipped() {
        let event = "SUMMARY:Nameless\nDTSTART:20250304T120000Z";
        let expansion = expand(&calendar(&[event]), &window()).unwrap();
        assert!(expansion.occurrences.is_empty());
        assert_eq!(expansion.skipped, 1);
    }

    #[test]
    fn all_day_entries_start_at_midnight_utc() {
        let event = "UID:holiday@school\n\
                     SUMMARY:Holiday\n\
                     DTSTART;VALUE=DATE:20250305\n\
                     DTEND;VALUE=DATE:20250307";
        let expansion = expand(&calendar(&[event]), &window()).unwrap();

        let occ = &expansion.occurrences[0];
        assert!(occ.all_day);
        assert_eq!(occ.start, utc(2025, 3, 5, 0, 0));
        assert_eq!(occ.end, utc(2025, 3, 7, 0, 0));
        assert_eq!(key_of(occ).as_str(), "holiday@school|2025-03-05");
    }

    #[test]
    fn all_day_without_end_lasts_one_day() {
        let event = "UID:inset@school\nSUMMARY:INSET day\nDTSTART;VALUE=DATE:20250312";
        let expansion = expand(&calendar(&[event]), &window()).unwrap();
        let occ = &expansion.occurrences[0];
        assert_eq!(occ.end - occ.start, Duration::days(1));
    }

    #[test]
    fn all_day_weekly_with_date_until() {
        let event = "UID:club@school\n\
                     SUMMARY:Club\n\
                     DTSTART;VALUE=DATE:20250303\n\
                     RRULE:FREQ=WEEKLY;UNTIL=20250317";
        let expansion = expand(&calendar(&[event]), &window()).unwrap();
        let dates: Vec<_> = expansion
            .occurrences
            .iter()
            .map(|o| key_of(o).as_str().to_string())
            .collect();
        assert_eq!(
            dates,
            vec!["club@school|2025-03-03", "club@school|2025-03-10", "club@school|2025-03-17"]
        );
    }

    #[test]
    fn tzid_is_resolved() {
        let event = "UID:berlin@school\n\
                     SUMMARY:Exchange call\n\
                     DTSTART;TZID=Europe/Berlin:20250303T090000\n\
                     DTEND;TZID=Europe/Berlin:20250303T100000";
        let expansion = expand(&calendar(&[event]), &window()).unwrap();
        assert_eq!(expansion.occurrences[0].start, utc(2025, 3, 3, 8, 0));
        assert_eq!(expansion.occurrences[0].end, utc(2025, 3, 3, 9, 0));
    }

    #[test]
    fn unknown_tzid_reads_as_utc() {
        let event = "UID:mars@school\n\
                     SUMMARY:Odd zone\n\
                     DTSTART;TZID=Mars/Olympus_Mons:20250303T090000\n\
                     DTEND;TZID=Mars/Olympus_Mons:20250303T100000";
        let expansion = expand(&calendar(&[event]), &window()).unwrap();
        assert_eq!(expansion.occurrences[0].start, utc(2025, 3, 3, 9, 0));
        assert_eq!(expansion.skipped, 0);
    }

    #[test]
    fn duration_used_when_dtend_missing() {
        let event = "UID:lesson@school\nSUMMARY:Lesson\nDTSTART:20250303T090000Z\nDURATION:PT45M";
        let expansion = expand(&calendar(&[event]), &window()).unwrap();
        let occ = &expansion.occurrences[0];
        assert_eq!(occ.end, utc(2025, 3, 3, 9, 45));
    }

    #[test]
    fn only_window_overlap_is_kept() {
        let inside = "UID:in@school\nSUMMARY:Inside\nDTSTART:20250310T090000Z\nDTEND:20250310T100000Z";
        let before = "UID:old@school\nSUMMARY:Old\nDTSTART:20250220T090000Z\nDTEND:20250220T100000Z";
        let straddling = "UID:night@school\nSUMMARY:Night\nDTSTART:20250227T230000Z\nDTEND:20250228T010000Z";
        let after = "UID:late@school\nSUMMARY:Late\nDTSTART:20250401T090000Z\nDTEND:20250401T100000Z";
        let expansion = expand(&calendar(&[inside, before, straddling, after]), &window()).unwrap();

        let uids: Vec<_> = expansion.occurrences.iter().map(|o| o.uid.as_str()).collect();
        assert_eq!(uids, vec!["night@school", "in@school"]);
    }

    #[test]
    fn details_and_transparency_are_read() {
        let event = "UID:fair@school\n\
                     SUMMARY:Book fair\\, hall\n\
                     LOCATION:Main hall\n\
                     DESCRIPTION:Bring\\ncash\n\
                     DTSTART:20250306T150000Z\n\
                     DTEND:20250306T170000Z\n\
                     TRANSP:TRANSPARENT";
        let expansion = expand(&calendar(&[event]), &window()).unwrap();
        let occ = &expansion.occurrences[0];
        assert_eq!(occ.title, "Book fair, hall");
        assert_eq!(occ.location.as_deref(), Some("Main hall"));
        assert_eq!(occ.description.as_deref(), Some("Bring\ncash"));
        assert_eq!(occ.transparency, Transparency::Transparent);
    }

    #[test]
    fn duplicate_definitions_keep_the_first() {
        let first = "UID:dup@school\nSUMMARY:First\nDTSTART:20250305T090000Z\nDTEND:20250305T100000Z";
        let second = "UID:dup@school\nSUMMARY:Second\nDTSTART:20250305T090000Z\nDTEND:20250305T110000Z";
        let expansion = expand(&calendar(&[first, second]), &window()).unwrap();
        assert_eq!(expansion.occurrences.len(), 1);
        assert_eq!(expansion.occurrences[0].title, "First");
    }

    #[test]
    fn non_calendar_document_is_an_error() {
        assert!(expand("<html></html>", &window()).is_err());
    }

    #[test]
    fn duration_parser() {
        assert_eq!(parse_duration("PT1H30M"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration("P1D"), Some(Duration::days(1)));
        assert_eq!(parse_duration("P1W"), Some(Duration::weeks(1)));
        assert_eq!(parse_duration("-PT15M"), Some(Duration::minutes(-15)));
        assert_eq!(parse_duration("P1DT2H"), Some(Duration::hours(26)));
        assert_eq!(parse_duration("+PT45S"), Some(Duration::seconds(45)));
        assert_eq!(parse_duration("1H"), None);
        assert_eq!(parse_duration("PT5"), None);
        assert_eq!(parse_duration("P9999999999999W"), None);
    }

    #[test]
    fn until_is_normalized() {
        assert_eq!(
            normalize_rrule("FREQ=WEEKLY;UNTIL=20250317"),
            "FREQ=WEEKLY;UNTIL=20250317T235959Z"
        );
        assert_eq!(
            normalize_rrule("FREQ=DAILY;UNTIL=20250317T090000"),
            "FREQ=DAILY;UNTIL=20250317T090000Z"
        );
        assert_eq!(normalize_rrule("FREQ=DAILY;COUNT=3"), "FREQ=DAILY;COUNT=3");
    }
}
