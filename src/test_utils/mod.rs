#![allow(missing_docs)]

mod fake_api;

pub(crate) use fake_api::{ApiCall, Endpoint, FakeExpenseApi};

use axum::Router;
use tokio::net::TcpListener;

use crate::{
    Expense, ExpenseId, SelectedFile,
    dev_server::{DevServerState, build_router},
};

pub(crate) fn expense(id: ExpenseId, title: &str, amount: f64) -> Expense {
    Expense {
        id,
        title: title.to_owned(),
        amount,
        file_reference: None,
    }
}

pub(crate) fn expense_with_file(id: ExpenseId, title: &str, amount: f64, file: &str) -> Expense {
    Expense {
        file_reference: Some(file.to_owned()),
        ..expense(id, title, amount)
    }
}

pub(crate) fn receipt() -> SelectedFile {
    SelectedFile::new("receipt.png", "image/png", vec![1, 2, 3])
}

/// Serve `router` on a free local port and return its base URL.
pub(crate) async fn serve(router: Router) -> String {
    let listener = bind().await;
    let base_url = base_url(&listener);

    spawn(listener, router);

    base_url
}

/// Serve a fresh dev server on a free local port and return its base URL.
pub(crate) async fn serve_dev_server() -> String {
    let listener = bind().await;
    let base_url = base_url(&listener);
    let state =
        DevServerState::new(&base_url, "http://localhost:5173").expect("Could not create state");

    spawn(listener, build_router(state));

    base_url
}

async fn bind() -> TcpListener {
    TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Could not bind test listener")
}

#[track_caller]
fn base_url(listener: &TcpListener) -> String {
    let addr = listener.local_addr().expect("Could not get local address");

    format!("http://{addr}")
}

fn spawn(listener: TcpListener, router: Router) {
    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Test server stopped unexpectedly");
    });
}
