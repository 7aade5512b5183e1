/*
 * MailPulse SMTP relay
 * Copyright (C) 2024 MailPulse
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

/// CRLF line framing over any duplex stream.
#[derive(Debug)]
pub struct AbstractIO<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    /// the underlying stream; writes pass through unbuffered.
    pub inner: tokio::io::BufReader<S>,
}

impl<S> AbstractIO<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    ///
    pub fn new(stream: S) -> Self {
        Self {
            inner: tokio::io::BufReader::new(stream),
        }
    }

    /// Give the stream back, dropping any read-ahead.
    ///
    /// Used for the STARTTLS upgrade: a client pipelining past STARTTLS is
    /// in protocol violation, its bytes are discarded with the buffer.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }

    /// Read one line, terminator stripped, `None` on a clean EOF.
    ///
    /// # Errors
    ///
    /// * the timeout elapsed (kind [`std::io::ErrorKind::TimedOut`])
    /// * the stream failed, or the line is not UTF-8
    pub async fn next_line(
        &mut self,
        timeout: Option<std::time::Duration>,
    ) -> std::io::Result<Option<String>> {
        tokio::time::timeout(
            timeout.unwrap_or(std::time::Duration::from_millis(500)),
            self.read_line(),
        )
        .await
        .map_err(|elapsed| std::io::Error::new(std::io::ErrorKind::TimedOut, elapsed))?
    }

    async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut buffer = Vec::new();
        if tokio::io::AsyncBufReadExt::read_until(&mut self.inner, b'\n', &mut buffer).await? == 0 {
            return Ok(None);
        }

        if buffer.ends_with(b"\n") {
            buffer.pop();
            if buffer.ends_with(b"\r") {
                buffer.pop();
            }
        }

        String::from_utf8(buffer)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
