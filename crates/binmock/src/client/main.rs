// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The binary a mock places on disk.
//!
//! On every invocation it opens a call with the control server, forwards
//! argv/env/cwd, relays the three standard streams, and terminates with the
//! exit code the controller scripts. If the server cannot be reached the
//! invocation fails with a non-zero exit.
//!
//! Compiled standalone by `rustc` with the server URL and proxy ID taken
//! from the compiler's environment, so only std is available here.

use std::env;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::process::exit;
use std::thread;

const SERVER_URL: &str = env!("BINMOCK_SERVER_URL");
const PROXY_ID: &str = env!("BINMOCK_PROXY_ID");

fn main() {
    match run() {
        Ok(code) => exit(code),
        Err(err) => {
            let _ = writeln!(io::stderr(), "binmock client: {err}");
            exit(1);
        }
    }
}

fn run() -> io::Result<i32> {
    let args: Vec<String> = env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let env_vars: Vec<String> = env::vars_os()
        .map(|(key, value)| {
            format!("{}={}", key.to_string_lossy(), value.to_string_lossy())
        })
        .collect();
    let dir = env::current_dir()?.to_string_lossy().into_owned();

    let call_id = open_call(&args, &env_vars, &dir)?;

    let stdout_path = stream_path(call_id, "stdout");
    let stderr_path = stream_path(call_id, "stderr");
    let stdout_relay = thread::spawn(move || relay_download(&stdout_path, io::stdout()));
    let stderr_relay = thread::spawn(move || relay_download(&stderr_path, io::stderr()));
    // Detached: local stdin may never reach EOF; process exit reaps it.
    thread::spawn(move || {
        let _ = upload_stdin(call_id);
    });

    let code = fetch_exit_code(call_id)?;

    // The server closes both output streams before it releases the exit
    // code, so these joins only drain what is already in flight.
    let _ = stdout_relay.join();
    let _ = stderr_relay.join();

    Ok(code)
}

fn stream_path(call_id: u64, name: &str) -> String {
    format!("/{PROXY_ID}/calls/{call_id}/{name}")
}

fn host_port() -> &'static str {
    SERVER_URL.trim_start_matches("http://")
}

struct Response {
    status: u16,
    chunked: bool,
    content_length: Option<u64>,
    reader: BufReader<TcpStream>,
}

fn request(method: &str, path: &str, body: Option<&[u8]>) -> io::Result<Response> {
    let mut stream = TcpStream::connect(host_port())?;
    let mut head = format!(
        "{method} {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n",
        host = host_port()
    );
    if let Some(body) = body {
        head.push_str("Content-Type: application/json\r\n");
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())?;
    if let Some(body) = body {
        stream.write_all(body)?;
    }
    stream.flush()?;
    read_head(stream)
}

fn read_head(stream: TcpStream) -> io::Result<Response> {
    let mut reader = BufReader::new(stream);
    let mut status_line = String::new();
    reader.read_line(&mut status_line)?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| invalid(format!("malformed status line {status_line:?}")))?;

    let mut chunked = false;
    let mut content_length = None;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("transfer-encoding")
            && value.eq_ignore_ascii_case("chunked")
        {
            chunked = true;
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().ok();
        }
    }
    Ok(Response {
        status,
        chunked,
        content_length,
        reader,
    })
}

fn copy_body<W: Write>(response: &mut Response, sink: &mut W) -> io::Result<()> {
    if response.chunked {
        copy_chunked(&mut response.reader, sink)
    } else if let Some(length) = response.content_length {
        io::copy(&mut (&mut response.reader).take(length), sink).map(drop)
    } else {
        io::copy(&mut response.reader, sink).map(drop)
    }
}

fn copy_chunked<R: BufRead, W: Write>(reader: &mut R, sink: &mut W) -> io::Result<()> {
    let mut buffer = [0u8; 8192];
    loop {
        let mut size_line = String::new();
        if reader.read_line(&mut size_line)? == 0 {
            // Connection closed at a chunk boundary; treat as end of body.
            return Ok(());
        }
        let size_text = size_line.trim().split(';').next().unwrap_or("");
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| invalid(format!("bad chunk size {size_text:?}")))?;
        if size == 0 {
            let mut trailer = String::new();
            let _ = reader.read_line(&mut trailer);
            return Ok(());
        }
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buffer.len());
            let got = reader.read(&mut buffer[..want])?;
            if got == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "body truncated mid-chunk",
                ));
            }
            sink.write_all(&buffer[..got])?;
            remaining -= got;
        }
        sink.flush()?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
    }
}

fn read_body(mut response: Response) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    copy_body(&mut response, &mut body)?;
    Ok(body)
}

fn open_call(args: &[String], env_vars: &[String], dir: &str) -> io::Result<u64> {
    let mut body = String::from("{\"args\":");
    encode_array(&mut body, args);
    body.push_str(",\"env\":");
    encode_array(&mut body, env_vars);
    body.push_str(",\"dir\":");
    encode_string(&mut body, dir);
    body.push('}');

    let response = request("POST", &format!("/{PROXY_ID}/calls"), Some(body.as_bytes()))?;
    if response.status != 200 {
        return Err(server_error("open call", response.status));
    }
    let body = read_body(response)?;
    parse_number(&body, "id")
        .map(|id| id as u64)
        .ok_or_else(|| invalid("call handle missing from response".to_string()))
}

fn upload_stdin(call_id: u64) -> io::Result<()> {
    let mut stream = TcpStream::connect(host_port())?;
    write!(
        stream,
        "PUT {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\nTransfer-Encoding: chunked\r\n\r\n",
        path = stream_path(call_id, "stdin"),
        host = host_port()
    )?;

    let mut input = io::stdin().lock();
    let mut buffer = [0u8; 8192];
    loop {
        let got = input.read(&mut buffer)?;
        if got == 0 {
            break;
        }
        write!(stream, "{got:x}\r\n")?;
        stream.write_all(&buffer[..got])?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
    }
    stream.write_all(b"0\r\n\r\n")?;
    stream.flush()?;
    Ok(())
}

fn relay_download<W: Write>(path: &str, mut sink: W) {
    let Ok(mut response) = request("GET", path, None) else {
        return;
    };
    if response.status != 200 {
        return;
    }
    let _ = copy_body(&mut response, &mut sink);
    let _ = sink.flush();
}

fn fetch_exit_code(call_id: u64) -> io::Result<i32> {
    let response = request("GET", &stream_path(call_id, "exitcode"), None)?;
    if response.status != 200 {
        return Err(server_error("exit code", response.status));
    }
    let body = read_body(response)?;
    parse_number(&body, "code")
        .map(|code| code as i32)
        .ok_or_else(|| invalid("exit code missing from response".to_string()))
}

/// Pull a numeric field out of a flat JSON object without a JSON parser.
fn parse_number(body: &[u8], name: &str) -> Option<i64> {
    let text = std::str::from_utf8(body).ok()?;
    let key = format!("\"{name}\":");
    let rest = text[text.find(&key)? + key.len()..].trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '-')
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

fn encode_array(out: &mut String, values: &[String]) {
    out.push('[');
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        encode_string(out, value);
    }
    out.push(']');
}

fn encode_string(out: &mut String, value: &str) {
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn server_error(operation: &str, status: u16) -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        format!("{operation} refused by control server (HTTP {status})"),
    )
}
