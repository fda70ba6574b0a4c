//! TCP front door: accepts connections, frames them with `PiousCodec`,
//! and forwards fully-decoded requests to the single dispatcher task.
//!
//! Grounded on the teacher's `proxmox_backup_proxy`-style accept loop
//! (bind, `loop { accept().await; tokio::spawn(handle_connection) }`),
//! adapted so every connection task only ever *moves data in*: all
//! actual work happens on `ServerState::run`'s task, reached over the
//! `mpsc::Sender<Inbound>` cloned into each connection.

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use crate::dispatcher::protocol::{self, TransRequest};
use crate::dispatcher::{CntrlRequestMsg, CntrlReplyMsg, Inbound, TransReplyMsg, TransRequestMsg};
use crate::error::PiousError;
use crate::transport::{Frame, PiousCodec};
use crate::wire::{CntrlOp, CntrlopHead, FromWire, OpKind, ToWire, TransOp, TransopHead};

pub async fn serve(listen_addr: &str, dispatch_tx: mpsc::Sender<Inbound>) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    log::info!("listening on {listen_addr}");
    loop {
        let (socket, peer) = listener.accept().await?;
        log::debug!("accepted connection from {peer}");
        let tx = dispatch_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, tx).await {
                log::warn!("connection {peer} closed: {err}");
            }
        });
    }
}

async fn handle_connection(socket: TcpStream, dispatch_tx: mpsc::Sender<Inbound>) -> std::io::Result<()> {
    let mut framed = Framed::new(socket, PiousCodec);

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let reply = match dispatch_frame(frame, &dispatch_tx).await {
            Some(reply) => reply,
            None => continue, // e.g. a silently-dropped retransmit-in-flight
        };
        framed.send(reply).await?;
    }
    Ok(())
}

/// Decodes one wire frame, forwards it to the dispatcher, awaits the
/// reply, and re-encodes it. Returns `None` only for the (rare) case
/// where the dispatcher deliberately never answers (spec.md section
/// 4.6's "still running" case) -- the oneshot sender was dropped, not
/// closed with a value.
async fn dispatch_frame(frame: Frame, dispatch_tx: &mpsc::Sender<Inbound>) -> Option<Frame> {
    match frame.op {
        OpKind::Trans(op) => dispatch_transop(op, frame.body, dispatch_tx).await,
        OpKind::Cntrl(op) => dispatch_cntrlop(op, frame.body, dispatch_tx).await,
    }
}

async fn dispatch_transop(op: TransOp, mut body: bytes::Bytes, dispatch_tx: &mpsc::Sender<Inbound>) -> Option<Frame> {
    let (head, req) = match protocol::decode_transop(op, &mut body) {
        Ok(v) => v,
        Err(e) => return Some(proto_error_trans_frame(op, e)),
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let msg = TransRequestMsg { transid: head.transid, seq: head.seq, req, reply: reply_tx };
    if dispatch_tx.send(Inbound::Trans(msg)).await.is_err() {
        return Some(proto_error_trans_frame(op, PiousError::EFatal));
    }

    let TransReplyMsg { result_code, payload } = reply_rx.await.ok()?;
    Some(protocol::encode_trans_reply(
        TransopHead { transid: head.transid, seq: head.seq, result_code },
        op,
        &payload,
    ))
}

async fn dispatch_cntrlop(op: CntrlOp, mut body: bytes::Bytes, dispatch_tx: &mpsc::Sender<Inbound>) -> Option<Frame> {
    let (head, req) = match protocol::decode_cntrlop(op, &mut body) {
        Ok(v) => v,
        // cmsgid itself may not have parsed; the client has no cmsgid
        // to correlate this reply against anyway if decoding failed.
        Err(e) => return Some(proto_error_cntrl_frame(op, 0, e)),
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let msg = CntrlRequestMsg { cmsgid: head.cmsgid, req, reply: reply_tx };
    if dispatch_tx.send(Inbound::Cntrl(msg)).await.is_err() {
        return Some(proto_error_cntrl_frame(op, head.cmsgid, PiousError::EFatal));
    }

    let CntrlReplyMsg { result_code, payload } = reply_rx.await.ok()?;
    Some(protocol::encode_cntrl_reply(CntrlopHead { cmsgid: head.cmsgid, result_code }, op, &payload))
}

fn proto_error_trans_frame(op: TransOp, err: PiousError) -> Frame {
    let mut buf = bytes::BytesMut::new();
    TransopHead {
        transid: crate::types::TransId { hostid: 0, procid: 0, sec: 0, usec: 0 },
        seq: 0,
        result_code: err.code(),
    }
    .to_wire(&mut buf);
    Frame { op: OpKind::Trans(op), body: buf.freeze() }
}

fn proto_error_cntrl_frame(op: CntrlOp, cmsgid: u32, err: PiousError) -> Frame {
    let mut buf = bytes::BytesMut::new();
    CntrlopHead { cmsgid, result_code: err.code() }.to_wire(&mut buf);
    Frame { op: OpKind::Cntrl(op), body: buf.freeze() }
}
