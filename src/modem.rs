//! SIM800L driver: power sequencing, AT bring-up, GPRS attach and the TCP
//! path that carries telemetry when the collar is out in the field.

use alloc::format;

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::{Read, Write};
use esp_hal::Async;
use esp_hal::gpio::Output;
use esp_hal::uart::{Uart, UartRx, UartTx};
use log::{info, warn};

use crate::config;
use crate::telemetry;

const RESP_CAPACITY: usize = 512;
/// The SIM800 needs a few seconds after the PWKEY pulse before it answers.
const BOOT_SETTLE_MS: u64 = 6_000;
const AT_SYNC_ATTEMPTS: u32 = 10;
const REGISTRATION_ATTEMPTS: u32 = 30;

#[derive(Debug)]
pub enum ModemError {
    Read,
    Write,
    Timeout,
    ErrorReply,
    ResponseOverflow,
    NotRegistered,
    ServerRejected,
}

type Response = heapless::String<RESP_CAPACITY>;

pub struct Sim800<'d> {
    rx: UartRx<'d, Async>,
    tx: UartTx<'d, Async>,
    pwkey: Output<'d>,
    rst: Output<'d>,
    power_on: Output<'d>,
}

impl<'d> Sim800<'d> {
    pub fn new(
        uart: Uart<'d, Async>,
        pwkey: Output<'d>,
        rst: Output<'d>,
        power_on: Output<'d>,
    ) -> Self {
        let (rx, tx) = uart.split();
        Sim800 {
            rx,
            tx,
            pwkey,
            rst,
            power_on,
        }
    }

    /// Rail on, reset released, PWKEY pulsed low, then wait out the boot.
    pub async fn power_up(&mut self) -> Result<(), ModemError> {
        self.power_on.set_high();
        self.rst.set_high();
        self.pwkey.set_high();
        Timer::after(Duration::from_millis(100)).await;
        self.pwkey.set_low();
        Timer::after(Duration::from_millis(1_000)).await;
        self.pwkey.set_high();
        Timer::after(Duration::from_millis(BOOT_SETTLE_MS)).await;

        for attempt in 1..=AT_SYNC_ATTEMPTS {
            match self.command("AT", "OK", Duration::from_secs(1)).await {
                Ok(_) => {
                    info!("SIM800 answered after {} attempt(s)", attempt);
                    // No echo, we parse replies, not our own commands
                    self.command("ATE0", "OK", Duration::from_secs(1)).await?;
                    return Ok(());
                }
                Err(_) => Timer::after(Duration::from_millis(500)).await,
            }
        }
        Err(ModemError::Timeout)
    }

    /// SIM unlock (when a PIN is configured), network registration, GPRS
    /// attach with the configured APN.
    pub async fn attach(&mut self) -> Result<(), ModemError> {
        if !config::SIM_PIN.is_empty() {
            let unlock = format!("AT+CPIN=\"{}\"", config::SIM_PIN);
            self.command(&unlock, "OK", Duration::from_secs(5)).await?;
        }

        let mut registered = false;
        for _ in 0..REGISTRATION_ATTEMPTS {
            let resp = self
                .command("AT+CREG?", "OK", Duration::from_secs(2))
                .await?;
            // 1 = home network, 5 = roaming
            if resp.contains(",1") || resp.contains(",5") {
                registered = true;
                break;
            }
            Timer::after(Duration::from_secs(1)).await;
        }
        if !registered {
            return Err(ModemError::NotRegistered);
        }

        if let Ok(resp) = self.command("AT+CSQ", "OK", Duration::from_secs(2)).await {
            if let Some(line) = resp.lines().find(|l| l.contains("+CSQ:")) {
                info!("Signal quality: {}", line.trim());
            }
        }

        self.command("AT+CGATT=1", "OK", Duration::from_secs(10))
            .await?;
        let cstt = format!(
            "AT+CSTT=\"{}\",\"{}\",\"{}\"",
            config::GPRS_APN,
            config::GPRS_USER,
            config::GPRS_PASS
        );
        self.command(&cstt, "OK", Duration::from_secs(5)).await?;
        self.command("AT+CIICR", "OK", Duration::from_secs(20))
            .await?;
        // CIFSR replies with the bare IP and no OK
        let ip = self.command("AT+CIFSR", ".", Duration::from_secs(5)).await?;
        info!("GPRS up, IP: {}", ip.trim());
        Ok(())
    }

    /// Carries one already-rendered HTTP request over a fresh TCP
    /// connection and checks the status line coming back.
    pub async fn http_send(
        &mut self,
        host: &str,
        port: u16,
        request: &str,
    ) -> Result<(), ModemError> {
        let start = format!("AT+CIPSTART=\"TCP\",\"{}\",{}", host, port);
        self.command(&start, "CONNECT OK", Duration::from_secs(15))
            .await?;

        let result = self.send_over_connection(request).await;

        // Best effort, the far side usually closes first
        let _ = self
            .command("AT+CIPCLOSE", "CLOSE OK", Duration::from_secs(5))
            .await;
        result
    }

    async fn send_over_connection(&mut self, request: &str) -> Result<(), ModemError> {
        let cipsend = format!("AT+CIPSEND={}", request.len());
        self.command(&cipsend, ">", Duration::from_secs(5)).await?;

        self.tx
            .write_all(request.as_bytes())
            .await
            .map_err(|_| ModemError::Write)?;
        let sent = self.read_until("SEND OK", Duration::from_secs(10)).await?;
        // The response may already be riding on the same read
        if telemetry::response_is_success(&sent) {
            return Ok(());
        }

        let mut resp = self.read_until("HTTP/1.", Duration::from_secs(10)).await?;
        // Pull in the rest of the status line
        let _ = select(
            Self::drain_line(&mut self.rx, &mut resp),
            Timer::after(Duration::from_secs(2)),
        )
        .await;
        if telemetry::response_is_success(&resp) {
            Ok(())
        } else {
            Err(ModemError::ServerRejected)
        }
    }

    async fn drain_line(
        rx: &mut UartRx<'d, Async>,
        resp: &mut Response,
    ) -> Result<(), ModemError> {
        let mut buf = [0u8; 64];
        loop {
            let n = rx.read(&mut buf).await.map_err(|_| ModemError::Read)?;
            for &b in &buf[..n] {
                if resp.push(b as char).is_err() {
                    return Ok(());
                }
                if b == b'\n' && resp.contains("HTTP/1.") {
                    return Ok(());
                }
            }
        }
    }

    /// Sends one command and waits for `expect`, collecting everything the
    /// modem says in between.
    pub async fn command(
        &mut self,
        cmd: &str,
        expect: &str,
        timeout: Duration,
    ) -> Result<Response, ModemError> {
        self.tx
            .write_all(cmd.as_bytes())
            .await
            .map_err(|_| ModemError::Write)?;
        self.tx
            .write_all(b"\r\n")
            .await
            .map_err(|_| ModemError::Write)?;
        let result = self.read_until(expect, timeout).await;
        if let Err(ModemError::ErrorReply) = &result {
            warn!("Modem rejected: {}", cmd);
        }
        result
    }

    async fn read_until(
        &mut self,
        expect: &str,
        timeout: Duration,
    ) -> Result<Response, ModemError> {
        let deadline = Instant::now() + timeout;
        let mut resp = Response::new();
        loop {
            let mut buf = [0u8; 64];
            match select(self.rx.read(&mut buf), Timer::at(deadline)).await {
                Either::First(Ok(n)) => {
                    for &b in &buf[..n] {
                        if resp.push(b as char).is_err() {
                            return Err(ModemError::ResponseOverflow);
                        }
                    }
                    if resp.contains(expect) {
                        return Ok(resp);
                    }
                    if resp.contains("ERROR") {
                        return Err(ModemError::ErrorReply);
                    }
                }
                Either::First(Err(_)) => return Err(ModemError::Read),
                Either::Second(_) => return Err(ModemError::Timeout),
            }
        }
    }
}
