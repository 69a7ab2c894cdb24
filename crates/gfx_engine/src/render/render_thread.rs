//! Producer to consumer frame hand-off
//!
//! Producers build [`FramePacket`]s and move them over a bounded channel. The
//! consumer owns the engine and drains packets in order, so the engine itself
//! needs no locking. A full channel blocks producers, which is the CPU side of
//! back-pressure; the GPU side is the frame-slot fence wait.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use thiserror::Error;

use crate::render::commands::RenderCommand;
use crate::render::error::RenderResult;
use crate::render::frame::Frame;

/// Something that can apply command lists and execute frames
pub trait FrameExecutor {
    /// Apply resource commands in order
    fn process_command_list(&mut self, commands: Vec<RenderCommand>) -> RenderResult<()>;

    /// Record, submit and present a frame
    fn frame(&mut self, frame: &Frame) -> RenderResult<()>;
}

/// Commands to apply followed by the frame to draw
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FramePacket {
    /// Resource commands, applied before the frame
    pub commands: Vec<RenderCommand>,
    /// Draws for this frame
    pub frame: Frame,
}

impl FramePacket {
    /// Package a command list and a frame
    pub const fn new(commands: Vec<RenderCommand>, frame: Frame) -> Self {
        Self { commands, frame }
    }
}

/// Hand-off failures seen by producers
#[derive(Error, Debug)]
pub enum FrameChannelError {
    /// The consumer has gone away
    #[error("render consumer disconnected")]
    Disconnected,

    /// The channel is at capacity
    #[error("frame queue is full")]
    Full,
}

/// Producer end of the frame channel
#[derive(Debug, Clone)]
pub struct FrameSubmitter {
    sender: Sender<FramePacket>,
}

impl FrameSubmitter {
    /// Send a packet, blocking while the channel is full
    pub fn submit(&self, packet: FramePacket) -> Result<(), FrameChannelError> {
        self.sender.send(packet).map_err(|_| FrameChannelError::Disconnected)
    }

    /// Send a packet without blocking
    pub fn try_submit(&self, packet: FramePacket) -> Result<(), FrameChannelError> {
        self.sender.try_send(packet).map_err(|err| match err {
            TrySendError::Full(_) => FrameChannelError::Full,
            TrySendError::Disconnected(_) => FrameChannelError::Disconnected,
        })
    }
}

/// Consumer end of the frame channel
#[derive(Debug)]
pub struct FrameReceiver {
    receiver: Receiver<FramePacket>,
}

impl FrameReceiver {
    /// Execute packets until every submitter is dropped
    ///
    /// Returns the number of frames executed. The first failing packet stops
    /// the loop and its error is returned.
    pub fn run<E: FrameExecutor>(&self, executor: &mut E) -> RenderResult<usize> {
        let mut executed = 0;
        for packet in &self.receiver {
            execute_packet(executor, packet)?;
            executed += 1;
        }
        log::debug!("[FRAME] Channel closed after {executed} frames");
        Ok(executed)
    }

    /// Execute the next packet if one is waiting
    pub fn try_execute_next<E: FrameExecutor>(&self, executor: &mut E) -> RenderResult<bool> {
        match self.receiver.try_recv() {
            Ok(packet) => {
                execute_packet(executor, packet)?;
                Ok(true)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Ok(false),
        }
    }

    /// Number of packets waiting
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

fn execute_packet<E: FrameExecutor>(executor: &mut E, packet: FramePacket) -> RenderResult<()> {
    let FramePacket { commands, frame } = packet;
    if !commands.is_empty() {
        executor.process_command_list(commands)?;
    }
    executor.frame(&frame)
}

/// Create a bounded frame channel holding at most `capacity` packets
pub fn frame_channel(capacity: usize) -> (FrameSubmitter, FrameReceiver) {
    let (sender, receiver) = bounded(capacity);
    (FrameSubmitter { sender }, FrameReceiver { receiver })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RendererConfig;
    use crate::render::backends::mock::{DeviceCall, MockDevice};
    use crate::render::engine::RenderEngine;
    use crate::render::error::RenderError;
    use crate::render::handle::VertexBufferHandle;
    use crate::render::vertex_layout::{AttributeType, VertexAttribute, VertexLayout};
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl FrameExecutor for Recorder {
        fn process_command_list(&mut self, commands: Vec<RenderCommand>) -> RenderResult<()> {
            self.events.push(format!("commands:{}", commands.len()));
            Ok(())
        }

        fn frame(&mut self, frame: &Frame) -> RenderResult<()> {
            if frame.render_queues.len() > 3 {
                return Err(RenderError::Unimplemented("too many queues"));
            }
            self.events.push(format!("frame:{}", frame.render_queues.len()));
            Ok(())
        }
    }

    fn frame_with_queues(count: usize) -> Frame {
        let mut frame = Frame::new();
        for _ in 0..count {
            frame.push(crate::render::frame::RenderQueue::new());
        }
        frame
    }

    #[test]
    fn test_packets_execute_in_order() {
        let (submitter, receiver) = frame_channel(2);
        let producer = thread::spawn(move || {
            for queues in 1..=3 {
                submitter.submit(FramePacket::new(Vec::new(), frame_with_queues(queues))).unwrap();
            }
        });

        let mut recorder = Recorder::default();
        let executed = receiver.run(&mut recorder).unwrap();
        producer.join().unwrap();

        assert_eq!(executed, 3);
        assert_eq!(recorder.events, vec!["frame:1", "frame:2", "frame:3"]);
    }

    #[test]
    fn test_commands_precede_their_frame() {
        let (submitter, receiver) = frame_channel(1);
        let command = RenderCommand::DeleteVertexBuffer {
            handle: VertexBufferHandle::new(1),
        };
        submitter
            .submit(FramePacket::new(vec![command], frame_with_queues(1)))
            .unwrap();

        let mut recorder = Recorder::default();
        assert!(receiver.try_execute_next(&mut recorder).unwrap());
        assert!(!receiver.try_execute_next(&mut recorder).unwrap());
        assert_eq!(recorder.events, vec!["commands:1", "frame:1"]);
    }

    #[test]
    fn test_full_channel_reports_back_pressure() {
        let (submitter, receiver) = frame_channel(1);
        submitter.try_submit(FramePacket::default()).unwrap();
        assert!(matches!(
            submitter.try_submit(FramePacket::default()),
            Err(FrameChannelError::Full)
        ));
        assert_eq!(receiver.pending(), 1);

        drop(receiver);
        assert!(matches!(
            submitter.submit(FramePacket::default()),
            Err(FrameChannelError::Disconnected)
        ));
    }

    #[test]
    fn test_failure_stops_the_consumer() {
        let (submitter, receiver) = frame_channel(4);
        submitter.submit(FramePacket::new(Vec::new(), frame_with_queues(4))).unwrap();
        submitter.submit(FramePacket::new(Vec::new(), frame_with_queues(1))).unwrap();
        drop(submitter);

        let mut recorder = Recorder::default();
        assert!(receiver.run(&mut recorder).is_err());
        assert!(recorder.events.is_empty());
        assert_eq!(receiver.pending(), 1);
    }

    #[test]
    fn test_engine_consumes_packets_from_producer_thread() {
        let (submitter, receiver) = frame_channel(2);
        let producer = thread::spawn(move || {
            let layout = VertexLayout::new().add(VertexAttribute::Position, AttributeType::Float, 2, false);
            let create = RenderCommand::CreateVertexBuffer {
                handle: VertexBufferHandle::new(1),
                data: vec![0; 24],
                layout,
            };
            submitter.submit(FramePacket::new(vec![create], Frame::new())).unwrap();
            submitter.submit(FramePacket::default()).unwrap();
        });

        let mut engine = RenderEngine::new(MockDevice::new(), &RendererConfig::default()).unwrap();
        assert_eq!(receiver.run(&mut engine).unwrap(), 2);
        producer.join().unwrap();

        assert!(engine.registry().vertex_buffer(VertexBufferHandle::new(1)).is_ok());
        let presents = engine
            .device()
            .calls_matching(|call| matches!(call, DeviceCall::Present { .. }));
        assert_eq!(presents.len(), 2);
    }
}
