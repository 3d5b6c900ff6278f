use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};

use super::state::CRLF;

/// Line oriented view of a client connection.
///
/// Every operation fails with [`io::ErrorKind::NotConnected`] once the
/// channel has been closed.
pub struct LineChannel<S> {
    stream: Option<BufStream<S>>,
}

impl<S> LineChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(BufStream::new(stream)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Read one line without its terminator.
    ///
    /// Both CRLF and a bare LF end a line. EOF is an error.
    pub async fn read_line(&mut self) -> io::Result<String> {
        let stream = self.stream()?;
        let mut line = String::new();

        if stream.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ));
        }

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        tracing::trace!("Read line {:?}", line);
        Ok(line)
    }

    /// Read lines up to a lone `.`, which is consumed but not returned.
    ///
    /// A leading dot is stripped from every other line.
    pub async fn read_dot_lines(&mut self) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();

        loop {
            let line = self.read_line().await?;
            if line == "." {
                return Ok(lines);
            }

            match line.strip_prefix('.') {
                Some(unstuffed) => lines.push(unstuffed.to_string()),
                None => lines.push(line),
            }
        }
    }

    /// Write each line followed by CRLF, then flush.
    ///
    /// A failure halfway may leave part of the reply on the wire.
    pub async fn send<I, L>(&mut self, lines: I) -> io::Result<()>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        let stream = self.stream()?;

        for line in lines {
            let line = line.as_ref();
            tracing::trace!("Sending {:?}", line);
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(CRLF.as_bytes()).await?;
        }

        stream.flush().await
    }

    /// Flush, shut down and drop the underlying stream.
    pub async fn close(&mut self) -> io::Result<()> {
        let mut stream = self.stream.take().ok_or_else(not_connected)?;
        stream.flush().await?;
        stream.shutdown().await
    }

    /// Drop the underlying stream without flushing or shutting it down.
    pub fn abort(&mut self) {
        self.stream.take();
    }

    fn stream(&mut self) -> io::Result<&mut BufStream<S>> {
        self.stream.as_mut().ok_or_else(not_connected)
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection already closed")
}
