use crate::collector::OutputChannel;
use futures::FutureExt;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use std::collections::VecDeque;
use tracing::trace;

/// SSH extended data type carrying stderr.
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// An exec channel drained without blocking: messages that already arrived
/// are moved into local buffers, anything still in flight is left for the
/// next poll.
pub struct SshChannel {
    channel: Channel<Msg>,
    stdout: VecDeque<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    closed: bool,
}

impl SshChannel {
    pub(crate) fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            stdout: VecDeque::new(),
            stderr: Vec::new(),
            exit_status: None,
            closed: false,
        }
    }

    fn pump(&mut self) {
        while !self.closed {
            match self.channel.wait().now_or_never() {
                // nothing queued right now
                None => break,
                Some(None) => self.closed = true,
                Some(Some(msg)) => self.handle(msg),
            }
        }
    }

    fn handle(&mut self, msg: ChannelMsg) {
        match msg {
            ChannelMsg::Data { ref data } => self.stdout.extend(data.iter().copied()),
            ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                self.stderr.extend_from_slice(data)
            }
            ChannelMsg::ExitStatus { exit_status } => self.exit_status = Some(exit_status),
            ChannelMsg::Close => self.closed = true,
            other => trace!(?other, "ignoring channel message"),
        }
    }
}

impl OutputChannel for SshChannel {
    fn recv_ready(&mut self) -> bool {
        self.pump();
        !self.stdout.is_empty()
    }

    fn recv(&mut self, max: usize) -> crate::Result<Vec<u8>> {
        let take = self.stdout.len().min(max);
        Ok(self.stdout.drain(..take).collect())
    }

    fn is_exhausted(&mut self) -> bool {
        self.pump();
        self.closed && self.stdout.is_empty()
    }

    fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    fn take_stderr(&mut self) -> Vec<u8> {
        self.pump();
        std::mem::take(&mut self.stderr)
    }

    async fn close(self) -> crate::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.channel.close().await?;
        Ok(())
    }
}
