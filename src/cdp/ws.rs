//! Minimal WebSocket client framing for the DevTools socket.
//!
//! Chrome's DevTools endpoint speaks plain RFC 6455 over localhost; a full
//! WebSocket stack is not needed for a single always-text connection.

use std::io::{Read, Write};
use std::net::TcpStream;

use crate::error::{Error, Result};

pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

/// Perform the client handshake on a freshly connected stream.
pub fn handshake(stream: &mut TcpStream, host_port: &str, path: &str) -> Result<()> {
    let key = base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        rand::random::<[u8; 16]>(),
    );

    let request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        path, host_port, key
    );

    stream
        .write_all(request.as_bytes())
        .map_err(|e| Error::transport_io("Handshake write failed", e))?;

    let mut response = [0u8; 1024];
    let n = stream
        .read(&mut response)
        .map_err(|e| Error::transport_io("Handshake read failed", e))?;
    let response = String::from_utf8_lossy(&response[..n]);

    if !response.contains("101") {
        return Err(Error::transport(format!(
            "WebSocket handshake rejected: {}",
            response.lines().next().unwrap_or("")
        )));
    }

    Ok(())
}

/// Write a single masked text frame.
pub fn write_text_frame(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    let len = data.len();
    let mut frame = Vec::with_capacity(14 + len);

    // FIN + text opcode
    frame.push(0x80 | OPCODE_TEXT);

    // Mask bit set (clients must mask), then length
    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len < 65536 {
        frame.push(0x80 | 126);
        frame.push((len >> 8) as u8);
        frame.push(len as u8);
    } else {
        frame.push(0x80 | 127);
        for i in (0..8).rev() {
            frame.push((len >> (i * 8)) as u8);
        }
    }

    // Fresh masking key per frame
    let mask: [u8; 4] = rand::random();
    frame.extend_from_slice(&mask);
    for (i, byte) in data.iter().enumerate() {
        frame.push(byte ^ mask[i % 4]);
    }

    stream.write_all(&frame)?;
    stream.flush()?;
    Ok(())
}

/// Write a close frame (empty payload).
pub fn write_close_frame(stream: &mut TcpStream) -> std::io::Result<()> {
    stream.write_all(&[0x80 | OPCODE_CLOSE, 0x80, 0, 0, 0, 0])?;
    stream.flush()
}

/// Write a pong frame in reply to a ping.
pub fn write_pong_frame(stream: &mut TcpStream) -> std::io::Result<()> {
    stream.write_all(&[0x80 | OPCODE_PONG, 0x80, 0, 0, 0, 0])?;
    stream.flush()
}

/// Read one frame, returning (opcode, unmasked payload).
pub fn read_frame(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header)?;

    let opcode = header[0] & 0x0F;
    let masked = (header[1] & 0x80) != 0;
    let mut len = (header[1] & 0x7F) as usize;

    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext)?;
        len = ((ext[0] as usize) << 8) | (ext[1] as usize);
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext)?;
        len = 0;
        for byte in ext.iter() {
            len = (len << 8) | (*byte as usize);
        }
    }

    let mask = if masked {
        let mut m = [0u8; 4];
        stream.read_exact(&mut m)?;
        Some(m)
    } else {
        None
    };

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;

    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok((opcode, payload))
}
