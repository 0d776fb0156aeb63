// Numus
// Copyright (C) 2021  Wesley Merkel
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! An OSC interface to the live-coding engine.
//!
//! The engine (Sonic Pi, listening on UDP port 4560 by default) does all of the audio synthesis.
//! This module only knows how to address it. The primary components are:
//!
//! * The [`Transport`] trait - Anything that can carry an OSC packet. [`Engine`] sends packets
//!   over UDP, [`Recorder`] keeps them in memory and [`LogTransport`] writes them to the log
//!   instead of sending them, which is how dry runs work.
//! * The command structs and the [`Command`] trait - One struct for every address the engine
//!   listens on. Each command is built with a `new` constructor and turned into an OSC packet
//!   when it is sent.
//!
//! Sending is fire-and-forget. The engine never replies, so nothing here waits for an
//! acknowledgement or retries a failed send.
//!
//! # Addresses
//!
//! [`Bpm`], [`ChordProgression`], [`Param`], [`Toggle`], [`Parts`], [`DebugText`],
//! [`PatternOverride`], [`Stop`], [`SegmentPlay`], [`SegmentStop`], [`SegmentParam`],
//! [`SegmentStopAll`]

mod private;

use private::{Message, Packet};
use rosc::{encoder::encode, OscError, OscMessage, OscPacket};
use std::{
    error, fmt, io,
    net::{ToSocketAddrs, UdpSocket},
    sync::{Arc, Mutex},
};

/// The default address of a locally running engine.
pub const DEFAULT_ADDRESS: (&str, u16) = ("127.0.0.1", 4560);

/// Something that can deliver OSC packets to the engine.
///
/// Implementations must be safe to share between the scheduler thread and a transition worker.
pub trait Transport: Send + Sync {
    /// Delivers a single packet.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet could not be encoded or handed to the network.
    fn send_packet(&self, packet: &OscPacket) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send_packet(&self, packet: &OscPacket) -> Result<()> {
        (**self).send_packet(packet)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_packet(&self, packet: &OscPacket) -> Result<()> {
        (**self).send_packet(packet)
    }
}

/// Sends a command over any transport.
pub fn send(transport: &dyn Transport, command: impl Command) -> Result<()> {
    log::debug!("send: {:?}", command);
    transport.send_packet(&command.into_packet().0)
}

/// A UDP client for the engine.
///
/// `Engine` is safe to clone and use concurrently by multiple threads.
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("socket", &self.0.socket)
            .finish()
    }
}

struct EngineInner {
    socket: UdpSocket,
}

impl Engine {
    /// Connects to an externally running engine using the given UDP address.
    ///
    /// This function will not start the engine. UDP is connectionless, so this succeeds even if
    /// nothing is listening on the other end.
    ///
    /// # Errors
    ///
    /// Returns an error if a UDP socket cannot be created or if the UDP socket cannot connect to
    /// the `engine_address`.
    pub fn connect<A: ToSocketAddrs>(engine_address: A) -> Result<Engine> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|err| Error(ErrorInner::UdpBind(err)))?;
        socket
            .connect(engine_address)
            .map_err(|err| Error(ErrorInner::UdpConnect(err)))?;
        Ok(Engine(Arc::new(EngineInner { socket })))
    }

    /// Sends a command to the engine and immediately returns.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    ///
    /// * The command cannot be encoded into an OSC packet.
    /// * The OSC packet cannot be sent to the engine.
    pub fn send(&self, command: impl Command) -> Result<()> {
        send(self, command)
    }
}

impl Transport for Engine {
    fn send_packet(&self, packet: &OscPacket) -> Result<()> {
        let bytes = encode(packet).map_err(|err| Error(ErrorInner::OscEncode(err)))?;
        self.0
            .socket
            .send(&bytes)
            .map_err(|err| Error(ErrorInner::Send(err)))?;
        Ok(())
    }
}

/// A transport that keeps every packet in memory.
///
/// Useful for inspecting exactly what a run would have sent.
#[derive(Debug, Default)]
pub struct Recorder {
    packets: Mutex<Vec<OscPacket>>,
}

impl Recorder {
    pub fn new() -> Recorder {
        Recorder::default()
    }

    /// Returns the recorded messages in the order they were sent. Bundles are skipped.
    pub fn messages(&self) -> Vec<OscMessage> {
        self.lock()
            .iter()
            .filter_map(|packet| match packet {
                OscPacket::Message(message) => Some(message.clone()),
                OscPacket::Bundle(_) => None,
            })
            .collect()
    }

    /// Returns the addresses of the recorded messages in the order they were sent.
    pub fn addrs(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .map(|message| message.addr)
            .collect()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<OscPacket>> {
        // a poisoned recorder still holds valid packets
        self.packets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for Recorder {
    fn send_packet(&self, packet: &OscPacket) -> Result<()> {
        self.lock().push(packet.clone());
        Ok(())
    }
}

/// A transport that logs packets instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

impl Transport for LogTransport {
    fn send_packet(&self, packet: &OscPacket) -> Result<()> {
        match packet {
            OscPacket::Message(message) => log::info!("[dry-run] {} {:?}", message.addr, message.args),
            OscPacket::Bundle(bundle) => log::info!("[dry-run] bundle {:?}", bundle),
        }
        Ok(())
    }
}

/// A specialized [`Result`] type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by [`Transport`] operations.
#[derive(Debug)]
pub struct Error(ErrorInner);

// Kept private so OscError does not leak into the public API.
#[derive(Debug)]
enum ErrorInner {
    UdpBind(io::Error),
    UdpConnect(io::Error),
    Send(io::Error),
    OscEncode(OscError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ErrorInner::UdpBind(e) => write!(f, "binding to UDP socket: {}", e),
            ErrorInner::UdpConnect(e) => write!(f, "connecting UDP socket to engine: {}", e),
            ErrorInner::Send(e) => write!(f, "sending message to engine: {}", e),
            ErrorInner::OscEncode(_) => write!(f, "encoding OSC packet"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.0 {
            ErrorInner::UdpBind(e) => Some(e),
            ErrorInner::UdpConnect(e) => Some(e),
            ErrorInner::Send(e) => Some(e),
            ErrorInner::OscEncode(_) => None,
        }
    }
}

impl Error {
    /// Creates a send error from an I/O error. Used by transports outside this module.
    pub fn send(err: io::Error) -> Error {
        Error(ErrorInner::Send(err))
    }
}

/// OSC commands accepted by the engine.
///
/// This trait cannot be implemented by types outside of this crate.
pub trait Command: fmt::Debug {
    #[doc(hidden)]
    fn into_packet(self) -> Packet;
}

/// Set the global tempo.
#[derive(Debug, Clone, PartialEq)]
pub struct Bpm {
    bpm: f32,
}

impl Bpm {
    pub fn new(bpm: f64) -> Bpm {
        Bpm { bpm: bpm as f32 }
    }
}

impl Command for Bpm {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        Message::addr("/engine/bpm").arg(self.bpm).into_packet()
    }
}

/// Send the chord progression, as a single comma separated string.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordProgression {
    chords: Vec<String>,
}

impl ChordProgression {
    pub fn new<I, S>(chords: I) -> ChordProgression
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ChordProgression {
            chords: chords.into_iter().map(S::into).collect(),
        }
    }
}

impl Command for ChordProgression {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        Message::addr("/engine/chord_prog")
            .arg(self.chords.join(","))
            .into_packet()
    }
}

/// Set a numeric parameter, sent to `/engine/param/<name>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    name: String,
    value: ParamValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParamValue {
    Int(i32),
    Float(f32),
}

impl Param {
    pub fn new(name: impl Into<String>, value: f32) -> Param {
        Param {
            name: name.into(),
            value: ParamValue::Float(value),
        }
    }

    /// A parameter whose value the engine reads as an integer, such as `chord_index`.
    pub fn int(name: impl Into<String>, value: i32) -> Param {
        Param {
            name: name.into(),
            value: ParamValue::Int(value),
        }
    }
}

impl Command for Param {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        let message = Message::addr(format!("/engine/param/{}", self.name));
        match self.value {
            ParamValue::Int(x) => message.arg(x),
            ParamValue::Float(x) => message.arg(x),
        }
        .into_packet()
    }
}

/// Switch a toggle on or off, sent to `/engine/toggle/<name>` as `1` or `0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Toggle {
    name: String,
    on: bool,
}

impl Toggle {
    pub fn new(name: impl Into<String>, on: bool) -> Toggle {
        Toggle {
            name: name.into(),
            on,
        }
    }
}

impl Command for Toggle {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        Message::addr(format!("/engine/toggle/{}", self.name))
            .arg(self.on as i32)
            .into_packet()
    }
}

/// Set the active parts, as a single comma separated string.
#[derive(Debug, Clone, PartialEq)]
pub struct Parts {
    parts: Vec<String>,
}

impl Parts {
    pub fn new<I, S>(parts: I) -> Parts
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Parts {
            parts: parts.into_iter().map(S::into).collect(),
        }
    }
}

impl Command for Parts {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        Message::addr("/engine/parts")
            .arg(self.parts.join(","))
            .into_packet()
    }
}

/// A free form line for the engine's log window.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugText {
    text: String,
}

impl DebugText {
    pub fn new(text: impl Into<String>) -> DebugText {
        DebugText { text: text.into() }
    }
}

impl Command for DebugText {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        Message::addr("/engine/debug").arg(self.text).into_packet()
    }
}

/// Replace the pattern a part is playing, sent to `/engine/pattern/<part>`.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternOverride {
    part: String,
    pattern: String,
}

impl PatternOverride {
    pub fn new(part: impl Into<String>, pattern: impl Into<String>) -> PatternOverride {
        PatternOverride {
            part: part.into(),
            pattern: pattern.into(),
        }
    }
}

impl Command for PatternOverride {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        Message::addr(format!("/engine/pattern/{}", self.part))
            .arg(self.pattern)
            .into_packet()
    }
}

/// End of the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    // Keeps every command constructed through `new`.
    _hidden: (),
}

impl Stop {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Stop {
        Stop { _hidden: () }
    }
}

impl Command for Stop {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        Message::addr("/engine/stop").arg(1).into_packet()
    }
}

/// Start a library segment as a named track.
///
/// The engine picks a player by `sub_type` and reads everything else from `params_json`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlay {
    track_name: String,
    sub_type: String,
    params_json: String,
}

impl SegmentPlay {
    pub fn new(
        track_name: impl Into<String>,
        sub_type: impl Into<String>,
        params_json: impl Into<String>,
    ) -> SegmentPlay {
        SegmentPlay {
            track_name: track_name.into(),
            sub_type: sub_type.into(),
            params_json: params_json.into(),
        }
    }
}

impl Command for SegmentPlay {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        Message::addr("/engine/segment/play")
            .arg(self.track_name)
            .arg(self.sub_type)
            .arg(self.params_json)
            .into_packet()
    }
}

/// Stop a named segment track.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentStop {
    track_name: String,
}

impl SegmentStop {
    pub fn new(track_name: impl Into<String>) -> SegmentStop {
        SegmentStop {
            track_name: track_name.into(),
        }
    }
}

impl Command for SegmentStop {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        Message::addr("/engine/segment/stop")
            .arg(self.track_name)
            .into_packet()
    }
}

/// Change one parameter of a playing segment track.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentParam {
    track_name: String,
    name: String,
    value: f32,
}

impl SegmentParam {
    pub fn new(track_name: impl Into<String>, name: impl Into<String>, value: f32) -> SegmentParam {
        SegmentParam {
            track_name: track_name.into(),
            name: name.into(),
            value,
        }
    }
}

impl Command for SegmentParam {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        Message::addr("/engine/segment/param")
            .arg(self.track_name)
            .arg(self.name)
            .arg(self.value)
            .into_packet()
    }
}

/// Stop every segment track.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentStopAll {
    _hidden: (),
}

impl SegmentStopAll {
    #[allow(clippy::new_without_default)]
    pub fn new() -> SegmentStopAll {
        SegmentStopAll { _hidden: () }
    }
}

impl Command for SegmentStopAll {
    #[doc(hidden)]
    fn into_packet(self) -> Packet {
        Message::addr("/engine/segment/stop_all").into_packet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::{decoder::decode, OscType};
    use std::time::Duration;

    #[test]
    fn test_command_addresses() {
        assert_eq!(packet(Bpm::new(128.0)), msg("/engine/bpm", vec![OscType::Float(128.0)]));
        assert_eq!(
            packet(ChordProgression::new(vec!["Am", "F", "C", "G"])),
            msg("/engine/chord_prog", vec![arg("Am,F,C,G")])
        );
        assert_eq!(
            packet(Param::new("pad_cutoff", 98.0)),
            msg("/engine/param/pad_cutoff", vec![OscType::Float(98.0)])
        );
        assert_eq!(
            packet(Param::int("chord_index", 2)),
            msg("/engine/param/chord_index", vec![OscType::Int(2)])
        );
        assert_eq!(
            packet(Toggle::new("drop_gap", true)),
            msg("/engine/toggle/drop_gap", vec![OscType::Int(1)])
        );
        assert_eq!(
            packet(Parts::new(vec!["kick", "pad"])),
            msg("/engine/parts", vec![arg("kick,pad")])
        );
        assert_eq!(
            packet(PatternOverride::new("kick", "four_floor")),
            msg("/engine/pattern/kick", vec![arg("four_floor")])
        );
        assert_eq!(packet(Stop::new()), msg("/engine/stop", vec![OscType::Int(1)]));
        assert_eq!(
            packet(SegmentParam::new("t1", "volume", 0.5)),
            msg(
                "/engine/segment/param",
                vec![arg("t1"), arg("volume"), OscType::Float(0.5)]
            )
        );
    }

    #[test]
    fn test_engine_sends_udp() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let engine = Engine::connect(receiver.local_addr().unwrap()).unwrap();

        engine.send(Toggle::new("sub_fade", false)).unwrap();

        let mut buffer = [0_u8; 1024];
        let len = receiver.recv(&mut buffer).unwrap();
        assert_eq!(
            decode(&buffer[..len]).unwrap(),
            msg("/engine/toggle/sub_fade", vec![OscType::Int(0)])
        );
    }

    #[test]
    fn test_recorder_keeps_order() {
        let recorder = Recorder::new();
        send(&recorder, Bpm::new(120.0)).unwrap();
        send(&recorder, Stop::new()).unwrap();
        assert_eq!(recorder.addrs(), vec!["/engine/bpm", "/engine/stop"]);
        recorder.clear();
        assert!(recorder.messages().is_empty());
    }

    #[test]
    fn test_dry_run_accepts_every_command() {
        let transport: Box<dyn Transport> = Box::new(LogTransport);
        let transport = transport.as_ref();
        send(transport, Bpm::new(128.0)).unwrap();
        send(transport, ChordProgression::new(vec!["Am", "F"])).unwrap();
        send(transport, Param::new("energy", 0.5)).unwrap();
        send(transport, Param::int("chord_index", 1)).unwrap();
        send(transport, Toggle::new("drop_gap", true)).unwrap();
        send(transport, Parts::new(Vec::<String>::new())).unwrap();
        send(transport, DebugText::new("SEC 0 c.a")).unwrap();
        send(transport, PatternOverride::new("kick", "four_floor")).unwrap();
        send(transport, SegmentPlay::new("t1", "pad", "{}")).unwrap();
        send(transport, SegmentParam::new("t1", "volume", 0.0)).unwrap();
        send(transport, SegmentStop::new("t1")).unwrap();
        send(transport, SegmentStopAll::new()).unwrap();
        send(transport, Stop::new()).unwrap();
        LogTransport
            .send_packet(&OscPacket::Bundle(rosc::OscBundle {
                timetag: (0, 1).into(),
                content: vec![packet(Stop::new())],
            }))
            .unwrap();
    }

    fn packet(command: impl Command) -> OscPacket {
        command.into_packet().0
    }

    fn msg(addr: &str, args: Vec<OscType>) -> OscPacket {
        OscPacket::Message(OscMessage {
            addr: addr.to_owned(),
            args,
        })
    }

    fn arg(x: impl Into<OscType>) -> OscType {
        x.into()
    }
}
