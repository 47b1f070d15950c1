//! Client Facade: `buy`/`buyUrl`/`doPayment`/`acceptPayment`/`acceptVerify`
//! glue between a [`ChannelManager`] and the HTTP transport.
//!
//! Follows a thin extract-call-respond split, handlers calling into business
//! logic, generalized to cover both directions of the protocol: a
//! sender-role facade POSTs payments out, a receiver-role facade accepts
//! them.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use paychan_core::{ChannelManager, Payment};
use reqwest::StatusCode;

use crate::error::AppError;
use crate::model::{PaymentChallenge, TokenResponse};

pub struct ClientFacade {
    manager: Arc<ChannelManager>,
    http: reqwest::Client,
}

impl ClientFacade {
    pub fn new(manager: Arc<ChannelManager>) -> Self {
        Self { manager, http: reqwest::Client::new() }
    }

    /// Obtain/open a channel to `receiver` covering `price`, sign the next
    /// payment, and ship it to `gateway`. Returns the opaque token.
    pub async fn buy(&self, receiver: Address, price: U256, gateway: &str) -> Result<String, AppError> {
        let channel = self.manager.require_open_channel(self.manager.address(), receiver, price).await?;
        let payment = self.manager.next_payment(channel.channel_id, price, None).await?;
        self.do_payment(&payment, gateway).await
    }

    /// GET `url`; if it answers with `402 Payment Required`, parse the
    /// challenge and complete the purchase, returning the resulting token.
    /// Any other status is surfaced as the body text.
    pub async fn buy_url(&self, url: &str) -> Result<String, AppError> {
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::PAYMENT_REQUIRED {
            let challenge: PaymentChallenge = response.json().await?;
            self.buy(challenge.receiver, challenge.price, &challenge.gateway).await
        } else {
            Ok(response.text().await?)
        }
    }

    /// POST a signed payment to a gateway URL, returning the issued token.
    pub async fn do_payment(&self, payment: &Payment, gateway: &str) -> Result<String, AppError> {
        let response = self.http.post(gateway).json(payment).send().await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::BadRequest(format!("gateway rejected payment: {body}")));
        }
        let token_response: TokenResponse = response.json().await?;
        Ok(token_response.token)
    }

    /// Receiver-side: validate and commit an inbound payment promise.
    pub async fn accept_payment(&self, payment: &Payment) -> Result<paychan_core::PaymentChannel, AppError> {
        Ok(self.manager.accept_payment(payment).await?)
    }

    /// Receiver-side: check whether a payment would be accepted, without
    /// committing any state change.
    pub async fn accept_verify(&self, payment: &Payment) -> Result<bool, AppError> {
        Ok(self.manager.verify_payment(payment).await?)
    }
}
