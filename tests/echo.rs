use rzmq_core::{Context, SocketType};

/// Same shape as the request/reply echo the teacher's `tests/echo.rs`
/// exercised against a wrapped `zmq::Socket`, retargeted at our own
/// ROUTER/DEALER pair over `inproc://`.
#[test]
fn echo() {
    let ctx = Context::new(1).unwrap();
    let ctx2 = ctx.clone();

    std::thread::spawn(move || {
        let mut rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let srv = rzmq_core::Socket::new(ctx2, SocketType::Router);
            srv.bind("inproc://echo-channel").unwrap();

            loop {
                let msgs = match srv.recv_multipart().await {
                    Ok(m) => m,
                    Err(_) => break,
                };
                if srv.send_multipart(msgs).await.is_err() {
                    break;
                }
            }
        });
    });

    let mut rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        // Give the server thread a moment to bind before dialing.
        tokio::time::delay_for(std::time::Duration::from_millis(50)).await;

        let cli = rzmq_core::Socket::new(ctx, SocketType::Dealer);
        cli.connect("inproc://echo-channel").unwrap();

        cli.send(b"hi".to_vec()).await.unwrap();
        let reply = cli.recv().await.unwrap();
        assert_eq!(reply.as_ref(), b"hi");
    });
}
