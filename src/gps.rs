//! NEO-6M driver: PMTK setup, GGA/RMC parsing, fix assembly and gating.

use core::fmt::Write as _;

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use esp_hal::Async;
use esp_hal::uart::{Uart, UartRx, UartTx};
use log::{debug, info, warn};

use crate::config;
use crate::nmea::{self, NmeaError};

const LINE_CAPACITY: usize = 128;

/// Setup sentences, sent in order after power-up.
const INIT_SEQUENCE: [&str; 6] = [
    config::CMD_UPDATE_RATE,
    config::CMD_NMEA_OUTPUT,
    config::CMD_SBAS_ON,
    config::CMD_DYNAMIC_MODEL,
    config::CMD_DATUM_WGS84,
    config::CMD_ANTENNA_ON,
];

#[derive(Debug)]
pub enum GpsError {
    Read,
    Write,
    BadCommand(NmeaError),
    FixTimeout,
}

#[derive(Debug, PartialEq)]
pub enum SentenceError {
    Nmea(NmeaError),
    MissingField,
    BadNumber,
}

impl From<NmeaError> for SentenceError {
    fn from(e: NmeaError) -> Self {
        SentenceError::Nmea(e)
    }
}

/// Receiver start condition. Picks the fix-acquisition budget: a receiver
/// with no almanac needs far longer than one that lost the signal for a
/// moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Cold,
    Warm,
    Hot,
}

impl StartMode {
    pub const fn timeout_ms(self) -> u64 {
        match self {
            StartMode::Cold => config::GPS_COLD_START_TIMEOUT_MS,
            StartMode::Warm => config::GPS_WARM_START_TIMEOUT_MS,
            StartMode::Hot => config::GPS_HOT_START_TIMEOUT_MS,
        }
    }

    /// Next tier after a missed budget.
    pub const fn degraded(self) -> StartMode {
        match self {
            StartMode::Hot => StartMode::Warm,
            StartMode::Warm | StartMode::Cold => StartMode::Cold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gga {
    pub time: heapless::String<12>,
    pub latitude: f64,
    pub longitude: f64,
    pub quality: u8,
    pub satellites: u8,
    pub hdop: f32,
    pub altitude_m: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rmc {
    pub time: heapless::String<12>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_knots: f32,
    pub course_deg: f32,
    pub date: heapless::String<8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sentence {
    Gga(Gga),
    Rmc(Rmc),
    /// Valid NMEA we don't consume (GSV, GSA, ...).
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub satellites: u8,
    pub hdop: f32,
    pub altitude_m: f32,
    pub speed_kmh: f32,
    pub course_deg: f32,
    /// ISO-8601 UTC, from the RMC date/time. The GPS is the collar's only
    /// wall clock.
    pub timestamp: heapless::String<24>,
}

fn field_str(fields: &[&str], idx: usize) -> Result<heapless::String<12>, SentenceError> {
    let raw = fields.get(idx).ok_or(SentenceError::MissingField)?;
    heapless::String::try_from(*raw).map_err(|_| SentenceError::BadNumber)
}

fn field_num<T: core::str::FromStr>(
    fields: &[&str],
    idx: usize,
    default: T,
) -> Result<T, SentenceError> {
    match fields.get(idx) {
        None => Err(SentenceError::MissingField),
        Some(&"") => Ok(default),
        Some(raw) => raw.parse().map_err(|_| SentenceError::BadNumber),
    }
}

/// Parses one line. `Ok(None)` means a structurally fine sentence that
/// carries no usable fix yet (GGA quality 0, RMC status V).
pub fn parse_sentence(line: &str) -> Result<Option<Sentence>, SentenceError> {
    let body = nmea::verify(line)?;
    let mut fields: heapless::Vec<&str, 24> = heapless::Vec::new();
    for f in body.split(',') {
        if fields.push(f).is_err() {
            return Err(SentenceError::MissingField);
        }
    }
    let tag = fields.first().ok_or(SentenceError::MissingField)?;
    // Any talker will do: GPGGA from the NEO-6M, GNGGA once GLONASS joins
    match tag.get(tag.len().saturating_sub(3)..) {
        Some("GGA") => parse_gga(&fields).map(|g| g.map(Sentence::Gga)),
        Some("RMC") => parse_rmc(&fields).map(|r| r.map(Sentence::Rmc)),
        _ => Ok(Some(Sentence::Other)),
    }
}

fn parse_gga(fields: &[&str]) -> Result<Option<Gga>, SentenceError> {
    let quality: u8 = field_num(fields, 6, 0)?;
    if quality == 0 {
        return Ok(None);
    }
    let latitude = nmea::parse_coordinate(
        fields.get(2).ok_or(SentenceError::MissingField)?,
        fields.get(3).ok_or(SentenceError::MissingField)?,
    )?;
    let longitude = nmea::parse_coordinate(
        fields.get(4).ok_or(SentenceError::MissingField)?,
        fields.get(5).ok_or(SentenceError::MissingField)?,
    )?;
    Ok(Some(Gga {
        time: field_str(fields, 1)?,
        latitude,
        longitude,
        quality,
        satellites: field_num(fields, 7, 0)?,
        hdop: field_num(fields, 8, 99.9)?,
        altitude_m: field_num(fields, 9, 0.0)?,
    }))
}

fn parse_rmc(fields: &[&str]) -> Result<Option<Rmc>, SentenceError> {
    match fields.get(2) {
        Some(&"A") => {}
        Some(_) => return Ok(None),
        None => return Err(SentenceError::MissingField),
    }
    let latitude = nmea::parse_coordinate(
        fields.get(3).ok_or(SentenceError::MissingField)?,
        fields.get(4).ok_or(SentenceError::MissingField)?,
    )?;
    let longitude = nmea::parse_coordinate(
        fields.get(5).ok_or(SentenceError::MissingField)?,
        fields.get(6).ok_or(SentenceError::MissingField)?,
    )?;
    let date = fields.get(9).ok_or(SentenceError::MissingField)?;
    Ok(Some(Rmc {
        time: field_str(fields, 1)?,
        latitude,
        longitude,
        speed_knots: field_num(fields, 7, 0.0)?,
        course_deg: field_num(fields, 8, 0.0)?,
        date: heapless::String::try_from(*date).map_err(|_| SentenceError::BadNumber)?,
    }))
}

/// `ddmmyy` + `hhmmss[.sss]` to `20yy-mm-ddThh:mm:ssZ`.
fn iso8601(date: &str, time: &str) -> Option<heapless::String<24>> {
    if date.len() != 6 || time.len() < 6 {
        return None;
    }
    if !date.bytes().all(|b| b.is_ascii_digit()) || !time.as_bytes()[..6].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let mut out = heapless::String::new();
    write!(
        out,
        "20{}-{}-{}T{}:{}:{}Z",
        &date[4..6],
        &date[2..4],
        &date[0..2],
        &time[0..2],
        &time[2..4],
        &time[4..6],
    )
    .ok()?;
    Some(out)
}

/// Pairs up GGA and RMC sentences stamped with the same time into one fix.
#[derive(Default)]
pub struct FixAssembler {
    gga: Option<Gga>,
    rmc: Option<Rmc>,
}

impl FixAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, sentence: Sentence) -> Option<GpsFix> {
        match sentence {
            Sentence::Gga(g) => self.gga = Some(g),
            Sentence::Rmc(r) => self.rmc = Some(r),
            Sentence::Other => {}
        }
        self.try_complete()
    }

    fn try_complete(&mut self) -> Option<GpsFix> {
        let gga = self.gga.as_ref()?;
        let rmc = self.rmc.as_ref()?;
        if gga.time != rmc.time {
            return None;
        }
        let timestamp = iso8601(&rmc.date, &rmc.time)?;
        let fix = GpsFix {
            latitude: gga.latitude,
            longitude: gga.longitude,
            satellites: gga.satellites,
            hdop: gga.hdop,
            altitude_m: gga.altitude_m,
            speed_kmh: rmc.speed_knots * 1.852,
            course_deg: rmc.course_deg,
            timestamp,
        };
        self.gga = None;
        self.rmc = None;
        Some(fix)
    }
}

/// Quality gate for assembled fixes.
#[derive(Debug, Clone, Copy)]
pub struct FixPolicy {
    pub min_satellites: u8,
    /// Upper bound; fixes with larger HDOP are discarded.
    pub max_hdop: f32,
}

impl FixPolicy {
    pub const COLLAR: FixPolicy = FixPolicy {
        min_satellites: config::GPS_MIN_SATELLITES,
        max_hdop: config::GPS_MIN_HDOP,
    };

    pub fn accepts(&self, fix: &GpsFix) -> bool {
        fix.satellites >= self.min_satellites && fix.hdop <= self.max_hdop
    }
}

pub struct Gps<'d> {
    rx: UartRx<'d, Async>,
    tx: UartTx<'d, Async>,
    line: heapless::Vec<u8, LINE_CAPACITY>,
    assembler: FixAssembler,
    policy: FixPolicy,
    start_mode: StartMode,
}

impl<'d> Gps<'d> {
    pub fn new(uart: Uart<'d, Async>) -> Self {
        let (rx, tx) = uart.split();
        Gps {
            rx,
            tx,
            line: heapless::Vec::new(),
            assembler: FixAssembler::new(),
            policy: FixPolicy::COLLAR,
            start_mode: StartMode::Cold,
        }
    }

    pub fn start_mode(&self) -> StartMode {
        self.start_mode
    }

    /// Pushes the PMTK setup down to the receiver. Each sentence is checked
    /// against its own checksum before it is trusted on the wire.
    pub async fn configure(&mut self) -> Result<(), GpsError> {
        for cmd in INIT_SEQUENCE {
            if cmd == config::CMD_SBAS_ON && !config::GPS_SBAS_ENABLED {
                continue;
            }
            nmea::verify(cmd).map_err(GpsError::BadCommand)?;
            self.tx
                .write_all(cmd.as_bytes())
                .await
                .map_err(|_| GpsError::Write)?;
            self.tx
                .write_all(b"\r\n")
                .await
                .map_err(|_| GpsError::Write)?;
            // Give the module a moment to ack before the next command
            Timer::after(Duration::from_millis(50)).await;
        }
        info!(
            "GPS configured: {} ms update rate, SBAS {}",
            config::GPS_UPDATE_RATE_MS,
            if config::GPS_SBAS_ENABLED { "on" } else { "off" }
        );
        Ok(())
    }

    async fn next_line(&mut self) -> Result<heapless::String<LINE_CAPACITY>, GpsError> {
        loop {
            if let Some(pos) = self.line.iter().position(|&b| b == b'\n') {
                let mut taken = heapless::String::new();
                if let Ok(s) = core::str::from_utf8(&self.line[..pos]) {
                    // Capacity matches the buffer, so this cannot fail
                    let _ = taken.push_str(s.trim_end_matches('\r'));
                }
                let rest: heapless::Vec<u8, LINE_CAPACITY> =
                    self.line[pos + 1..].iter().copied().collect();
                self.line = rest;
                if !taken.is_empty() {
                    return Ok(taken);
                }
                continue;
            }

            let mut buf = [0u8; 64];
            let n = self.rx.read(&mut buf).await.map_err(|_| GpsError::Read)?;
            if self.line.extend_from_slice(&buf[..n]).is_err() {
                // Overrun without a newline in sight, drop and resync
                self.line.clear();
            }
        }
    }

    /// Runs the UART until a fix passes the quality gate.
    pub async fn next_fix(&mut self) -> Result<GpsFix, GpsError> {
        loop {
            let line = self.next_line().await?;
            if config::GPS_RAW_NMEA_ENABLED {
                debug!("NMEA: {}", line.as_str());
            }
            match parse_sentence(&line) {
                Ok(Some(sentence)) => {
                    if let Some(fix) = self.assembler.ingest(sentence) {
                        if self.policy.accepts(&fix) {
                            return Ok(fix);
                        }
                        if config::GPS_DEBUG_ENABLED {
                            debug!(
                                "fix rejected: {} sats, HDOP {}",
                                fix.satellites, fix.hdop
                            );
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // UART noise and half lines are routine right after
                    // power-up
                    if config::GPS_DEBUG_ENABLED {
                        debug!("unparseable sentence: {:?}", e);
                    }
                }
            }
        }
    }

    /// One acquisition attempt under the current start-mode budget. Success
    /// promotes the receiver to hot starts; a miss degrades the tier.
    pub async fn acquire(&mut self) -> Result<GpsFix, GpsError> {
        let budget = Duration::from_millis(self.start_mode.timeout_ms());
        match select(self.next_fix(), Timer::after(budget)).await {
            Either::First(res) => {
                let fix = res?;
                self.start_mode = StartMode::Hot;
                Ok(fix)
            }
            Either::Second(_) => {
                warn!(
                    "no acceptable fix within {} ms ({:?} start)",
                    budget.as_millis(),
                    self.start_mode
                );
                self.start_mode = self.start_mode.degraded();
                Err(GpsError::FixTimeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GGA_QUITO: &str =
        "$GPGGA,062735.000,0012.3456,S,07830.1234,W,1,07,1.2,2850.3,M,26.1,M,,*64";
    const RMC_QUITO: &str =
        "$GPRMC,062735.000,A,0012.3456,S,07830.1234,W,0.95,41.2,060825,,,A*69";
    const GGA_NO_FIX: &str = "$GPGGA,,,,,,0,00,,,M,,M,,*66";
    const RMC_VOID: &str = "$GPRMC,235959.999,V,,,,,,,010100,,,N*45";

    fn quito_fix() -> GpsFix {
        let mut asm = FixAssembler::new();
        assert!(
            asm.ingest(parse_sentence(GGA_QUITO).unwrap().unwrap())
                .is_none()
        );
        asm.ingest(parse_sentence(RMC_QUITO).unwrap().unwrap())
            .expect("matching GGA+RMC must complete a fix")
    }

    #[test]
    fn gga_parses_position_and_quality() {
        let Some(Sentence::Gga(gga)) = parse_sentence(GGA_QUITO).unwrap() else {
            panic!("expected GGA");
        };
        assert!((gga.latitude + 0.205_76).abs() < 1e-5);
        assert!((gga.longitude + 78.502_056_7).abs() < 1e-6);
        assert_eq!(gga.quality, 1);
        assert_eq!(gga.satellites, 7);
        assert!((gga.hdop - 1.2).abs() < 1e-6);
        assert!((gga.altitude_m - 2850.3).abs() < 1e-3);
    }

    #[test]
    fn rmc_parses_motion_and_date() {
        let Some(Sentence::Rmc(rmc)) = parse_sentence(RMC_QUITO).unwrap() else {
            panic!("expected RMC");
        };
        assert!((rmc.speed_knots - 0.95).abs() < 1e-6);
        assert!((rmc.course_deg - 41.2).abs() < 1e-6);
        assert_eq!(rmc.date.as_str(), "060825");
    }

    #[test]
    fn sentences_without_a_fix_yield_nothing() {
        assert_eq!(parse_sentence(GGA_NO_FIX), Ok(None));
        assert_eq!(parse_sentence(RMC_VOID), Ok(None));
    }

    #[test]
    fn corrupted_line_is_an_error() {
        let tampered = GGA_QUITO.replace("07,", "08,");
        assert!(matches!(
            parse_sentence(&tampered),
            Err(SentenceError::Nmea(NmeaError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn assembler_pairs_matching_times() {
        let fix = quito_fix();
        assert_eq!(fix.satellites, 7);
        assert_eq!(fix.timestamp.as_str(), "2025-08-06T06:27:35Z");
        assert!((fix.speed_kmh - 0.95 * 1.852).abs() < 1e-4);
    }

    #[test]
    fn assembler_rejects_mismatched_times() {
        let mut asm = FixAssembler::new();
        let _ = asm.ingest(parse_sentence(GGA_QUITO).unwrap().unwrap());
        let stale =
            "$GPRMC,120000.000,A,4807.038,N,01131.000,E,4.5,84.4,060825,,,A*5F";
        assert!(asm.ingest(parse_sentence(stale).unwrap().unwrap()).is_none());
    }

    #[test]
    fn policy_gates_on_satellites_and_hdop() {
        let policy = FixPolicy::COLLAR;
        let mut fix = quito_fix();
        assert!(policy.accepts(&fix));

        fix.satellites = config::GPS_MIN_SATELLITES - 1;
        assert!(!policy.accepts(&fix));

        fix.satellites = config::GPS_MIN_SATELLITES;
        fix.hdop = config::GPS_MIN_HDOP + 0.1;
        assert!(!policy.accepts(&fix));
    }

    #[test]
    fn start_mode_degrades_towards_cold() {
        assert_eq!(StartMode::Hot.degraded(), StartMode::Warm);
        assert_eq!(StartMode::Warm.degraded(), StartMode::Cold);
        assert_eq!(StartMode::Cold.degraded(), StartMode::Cold);
        assert!(StartMode::Cold.timeout_ms() > StartMode::Warm.timeout_ms());
        assert!(StartMode::Warm.timeout_ms() > StartMode::Hot.timeout_ms());
    }
}
