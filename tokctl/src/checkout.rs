//! Order creation and payment confirmation.
//!
//! Creating an order verifies the purchase, appends a pending row to the user's ledger
//! (keyed by a fresh receipt) and opens a gateway order for the payable amount. Confirming
//! a payment asks the gateway whether the order was captured and then fulfils it.
//!
//! A coupon or offer use is held by the pending order from creation, so two open orders
//! cannot both be priced with a single-use promotion. The hold is dropped again when the
//! order cannot be paid and goes stale after `purchase.promotion_hold`.
//!
//! Fulfilment is shared by three callers: customer confirmation, gateway webhooks and
//! zero-payable orders. It credits tokens with the receipt as idempotency key before
//! marking the order paid, so a retry after a failure between the two steps replays the
//! allotment instead of crediting twice.

use crate::allotment::{Allotment, AllotmentError, AllotmentMetadata, AllotmentRequest, TokenAllotmentEngine};
use crate::billing::{
    AppliedPromotion, PromoKind, PurchaseError, PurchaseQuote, PurchaseRequest, PurchaseVerifier, receipts,
};
use crate::config::PurchaseConfig;
use crate::db::handlers::repository::{Coupons, Offers, OrderLedger, Repositories};
use crate::db::models::orders::{Order, OrderCreateDBRequest};
use crate::errors::{Error, Result};
use crate::payment_providers::{GatewayOrder, GatewayOrderRequest, PaymentError, PaymentLookup, PaymentProvider, PaymentState};
use axum::http::HeaderMap;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Gateway events that mean the order has been paid
const SETTLEMENT_EVENTS: &[&str] = &["payment.captured", "order.paid"];

/// How an order's payment was settled at creation time
#[derive(Debug, Clone)]
pub enum CheckoutPayment {
    /// The customer pays against this gateway order
    Gateway(GatewayOrder),
    /// Nothing to pay; tokens were credited immediately
    Waived(Allotment),
}

#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub receipt: String,
    pub quote: PurchaseQuote,
    pub payment: CheckoutPayment,
}

/// Identifiers returned to the client by the gateway's checkout
#[derive(Debug, Clone, Default)]
pub struct PaymentConfirmation {
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub signature: Option<String>,
}

/// Result of fulfilling an order
#[derive(Debug, Clone)]
pub struct Fulfilment {
    pub order_id: String,
    pub receipt: String,
    /// None when the order had already been fulfilled
    pub allotment: Option<Allotment>,
}

impl Fulfilment {
    pub fn already_fulfilled(&self) -> bool {
        self.allotment.is_none()
    }
}

/// The part of a billing snapshot fulfilment depends on
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FulfilmentTerms {
    agent_id: Option<String>,
    model_name: Option<String>,
    tokens: Option<i64>,
    #[serde(default)]
    promo: Option<AppliedPromotion>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Abbreviated notes attached to the gateway order
pub fn gateway_notes(quote: &PurchaseQuote) -> BTreeMap<String, String> {
    let mut notes = BTreeMap::from([
        ("u".to_string(), quote.username.clone()),
        ("a".to_string(), quote.agent_id.clone()),
        ("t".to_string(), quote.tokens.to_string()),
        ("amt".to_string(), quote.final_payable.to_string()),
        ("bp".to_string(), quote.base_amount.to_string()),
        ("ppt".to_string(), quote.display_per_token_price().to_string()),
        ("bd".to_string(), quote.base_discount.amount.to_string()),
        ("pd".to_string(), quote.promo_discount().to_string()),
    ]);
    if let Some(promo) = &quote.promo {
        let kind = match promo.kind {
            PromoKind::Coupon => "coupon",
            PromoKind::Offer => "offer",
        };
        notes.insert("pt".to_string(), kind.to_string());
        notes.insert("pc".to_string(), promo.code.clone());
    }
    notes
}

/// Fulfilment source of orders with nothing to pay
const ZERO_PAYABLE_SOURCE: &str = "zero_payable";

fn allotment_failure(receipt: &str, source: &str, err: AllotmentError) -> Error {
    let message = if source == ZERO_PAYABLE_SOURCE {
        format!("Tokens could not be credited for this order. Please contact support with receipt {receipt}.")
    } else {
        format!("Payment received but tokens could not be credited. Please contact support with receipt {receipt}.")
    };
    Error::SupportRequired {
        message,
        detail: err.to_string(),
    }
}

/// Purchase use cases, wired from the application state
#[derive(Clone)]
pub struct Checkout {
    verifier: PurchaseVerifier,
    engine: TokenAllotmentEngine,
    orders: Arc<dyn OrderLedger>,
    coupons: Arc<dyn Coupons>,
    offers: Arc<dyn Offers>,
    payments: Option<Arc<dyn PaymentProvider>>,
    receipt_prefix: String,
    receipt_max_length: usize,
    promotion_hold: Duration,
}

impl Checkout {
    pub fn new(repos: &Repositories, payments: Option<Arc<dyn PaymentProvider>>, purchase: &PurchaseConfig) -> Self {
        Self {
            verifier: PurchaseVerifier::new(repos, purchase.max_tokens_per_order),
            engine: TokenAllotmentEngine::new(repos, purchase.max_tokens_per_allotment),
            orders: repos.orders.clone(),
            coupons: repos.coupons.clone(),
            offers: repos.offers.clone(),
            payments,
            receipt_prefix: purchase.receipt_prefix.clone(),
            receipt_max_length: purchase.receipt_max_length,
            promotion_hold: purchase.promotion_hold,
        }
    }

    fn provider(&self) -> Result<&Arc<dyn PaymentProvider>> {
        self.payments.as_ref().ok_or_else(|| Error::Internal {
            operation: "process payment: no payment provider is configured".to_string(),
        })
    }

    /// Price a purchase without side effects
    pub async fn quote(&self, request: &PurchaseRequest) -> Result<PurchaseQuote> {
        Ok(self.verifier.verify(request).await?)
    }

    #[instrument(skip_all, fields(username = %request.username, agent_id = %request.agent_id), err)]
    pub async fn create_order(&self, request: &PurchaseRequest) -> Result<CreatedOrder> {
        let quote = self.verifier.verify(request).await?;
        if quote.final_payable < Decimal::ZERO {
            return Err(Error::Internal {
                operation: format!("price order: negative payable {}", quote.final_payable),
            });
        }

        let receipt = receipts::generate(&self.receipt_prefix, self.receipt_max_length).map_err(|e| Error::Internal {
            operation: format!("generate receipt: {e}"),
        })?;
        let billing_snapshot = serde_json::to_value(&quote).map_err(|e| Error::Internal {
            operation: format!("serialize billing snapshot: {e}"),
        })?;

        if let Some(promo) = &quote.promo {
            self.hold_promotion(&quote.username, &receipt, promo).await?;
        }

        let order = match self
            .orders
            .insert_pending(&OrderCreateDBRequest {
                username: quote.username.clone(),
                receipt: receipt.clone(),
                amount: quote.final_payable,
                currency: quote.currency.clone(),
                billing_snapshot,
            })
            .await
        {
            Ok(order) => order,
            Err(e) => {
                self.release_promotion(&quote, &receipt).await;
                return Err(e.into());
            }
        };
        info!(receipt = %receipt, amount = %quote.final_payable, "Pending order recorded");

        if quote.final_payable.is_zero() {
            let fulfilment = self.fulfil(&order, ZERO_PAYABLE_SOURCE).await?;
            metrics::counter!("tokctl_orders_created_total", "payment" => "waived").increment(1);
            let allotment = fulfilment.allotment.ok_or_else(|| Error::Internal {
                operation: format!("fulfil new order {receipt}: already fulfilled"),
            })?;
            return Ok(CreatedOrder {
                receipt,
                quote,
                payment: CheckoutPayment::Waived(allotment),
            });
        }

        let provider = match self.provider() {
            Ok(provider) => provider,
            Err(e) => {
                self.release_promotion(&quote, &receipt).await;
                return Err(e);
            }
        };
        let gateway_order = match provider
            .create_order(&GatewayOrderRequest {
                amount: quote.final_payable,
                currency: quote.currency.clone(),
                receipt: receipt.clone(),
                notes: gateway_notes(&quote),
            })
            .await
        {
            Ok(gateway_order) => gateway_order,
            Err(e) => {
                metrics::counter!("tokctl_gateway_errors_total", "operation" => "create_order").increment(1);
                // Without a gateway order nothing can be paid against this receipt
                self.release_promotion(&quote, &receipt).await;
                return Err(Error::Internal {
                    operation: format!("create gateway order for receipt {receipt}: {e}"),
                });
            }
        };

        self.orders
            .attach_external_id(&quote.username, &receipt, &gateway_order.id)
            .await
            .map_err(|e| Error::SupportRequired {
                message: format!("Payment order could not be saved. Please contact support with receipt {receipt}."),
                detail: format!("attach gateway order {}: {e}", gateway_order.id),
            })?;

        metrics::counter!("tokctl_orders_created_total", "payment" => "gateway").increment(1);
        info!(receipt = %receipt, gateway_order = %gateway_order.id, "Gateway order created");

        Ok(CreatedOrder {
            receipt,
            quote,
            payment: CheckoutPayment::Gateway(gateway_order),
        })
    }

    #[instrument(skip_all, fields(username = %username), err)]
    pub async fn confirm_payment(&self, username: &str, confirmation: &PaymentConfirmation) -> Result<Fulfilment> {
        let provider = self.provider()?;
        let order_id = non_blank(confirmation.order_id.as_deref());
        let payment_id = non_blank(confirmation.payment_id.as_deref());

        let lookup = match (order_id, payment_id) {
            (Some(order_id), _) => PaymentLookup::Order(order_id),
            (None, Some(payment_id)) => PaymentLookup::Payment(payment_id),
            (None, None) => return Err(Error::bad_request("razorpay_order_id or razorpay_payment_id is required")),
        };

        if let (Some(signature), Some(order_id), Some(payment_id)) =
            (non_blank(confirmation.signature.as_deref()), order_id, payment_id)
            && !provider.verify_payment_signature(order_id, payment_id, signature)
        {
            return Err(PaymentError::InvalidSignature.into());
        }

        let report = provider.fetch_status(lookup).await.map_err(|e| {
            metrics::counter!("tokctl_gateway_errors_total", "operation" => "fetch_status").increment(1);
            Error::from(e)
        })?;
        if report.state != PaymentState::Captured {
            return Err(Error::bad_request(format!("Payment not completed (status: {})", report.state)));
        }

        let order_id = match (order_id, report.order_id.as_deref()) {
            (Some(requested), Some(reported)) if requested != reported => {
                return Err(Error::bad_request("Payment does not belong to this order"));
            }
            (Some(requested), _) => requested.to_string(),
            (None, Some(reported)) => reported.to_string(),
            (None, None) => return Err(Error::bad_request("Payment is not linked to an order")),
        };

        let order = self
            .orders
            .find_by_external_id(username, &order_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource: "Order".to_string(),
                id: order_id.clone(),
            })?;

        self.fulfil(&order, "payment_confirmation").await
    }

    /// Authenticate a gateway callback and fulfil the order it settles.
    ///
    /// Returns None for callbacks that need no action.
    #[instrument(skip_all, err)]
    pub async fn handle_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<Fulfilment>> {
        let provider = self.provider()?;
        let Some(event) = provider.validate_webhook(headers, body).await.map_err(|e| match e {
            PaymentError::InvalidSignature => Error::Unauthenticated {
                message: Some("Invalid webhook signature".to_string()),
            },
            PaymentError::InvalidData(reason) => Error::bad_request(reason),
            other => Error::from(other),
        })?
        else {
            return Ok(None);
        };

        if !SETTLEMENT_EVENTS.contains(&event.event_type.as_str()) {
            info!(event = %event.event_type, "Ignoring webhook event");
            return Ok(None);
        }
        let Some(order_id) = event.order_id else {
            warn!(event = %event.event_type, "Settlement event without an order id");
            return Ok(None);
        };

        let Some(order) = self.orders.find_any_by_external_id(&order_id).await? else {
            warn!(order_id = %order_id, "Settlement event for an unknown order");
            return Ok(None);
        };

        self.fulfil(&order, "webhook").await.map(Some)
    }

    /// Credit an order's tokens and mark it paid. Safe to call repeatedly.
    #[instrument(skip_all, fields(receipt = %order.receipt, source = %source), err)]
    pub async fn fulfil(&self, order: &Order, source: &str) -> Result<Fulfilment> {
        if order.fulfillment {
            info!("Order already fulfilled, nothing to do");
            return Ok(Fulfilment {
                order_id: order.order_id.clone(),
                receipt: order.receipt.clone(),
                allotment: None,
            });
        }

        let terms: FulfilmentTerms = serde_json::from_value(order.billing_snapshot.clone())
            .map_err(|e| Error::bad_request(format!("Order {} has an unreadable billing snapshot: {e}", order.receipt)))?;
        let (Some(agent_id), Some(model_name), Some(tokens)) = (terms.agent_id, terms.model_name, terms.tokens) else {
            return Err(Error::bad_request(format!(
                "Order {} is missing agentId, modelName or tokens",
                order.receipt
            )));
        };

        let allotment = self
            .engine
            .allot(&AllotmentRequest {
                username: order.username.clone(),
                agent_id,
                model_name,
                tokens,
                idempotency_key: Some(order.receipt.clone()),
                metadata: AllotmentMetadata {
                    receipt: Some(order.receipt.clone()),
                    source: Some(source.to_string()),
                },
            })
            .await
            .map_err(|e| allotment_failure(&order.receipt, source, e))?;

        let marked = self
            .orders
            .mark_fulfilled(&order.username, &order.receipt)
            .await
            .map_err(|e| Error::SupportRequired {
                message: format!(
                    "Tokens were credited but the order could not be updated. Please retry or contact support with receipt {}.",
                    order.receipt
                ),
                detail: e.to_string(),
            })?;
        if !marked {
            // A concurrent confirmation got there first; our allotment was a replay.
            info!("Order fulfilled concurrently");
            return Ok(Fulfilment {
                order_id: order.order_id.clone(),
                receipt: order.receipt.clone(),
                allotment: None,
            });
        }

        if let Some(promo) = &terms.promo {
            self.redeem(&order.username, &order.receipt, promo).await;
        }

        metrics::counter!("tokctl_payments_confirmed_total", "source" => source.to_string()).increment(1);
        info!(tokens = allotment.tokens, replayed = allotment.replayed, "Order fulfilled");

        Ok(Fulfilment {
            order_id: order.order_id.clone(),
            receipt: order.receipt.clone(),
            allotment: Some(allotment),
        })
    }

    /// Reserve the promotion `receipt` was priced with, or fail when another order has it
    async fn hold_promotion(&self, username: &str, receipt: &str, promo: &AppliedPromotion) -> Result<()> {
        let now = Utc::now();
        let hold = chrono::Duration::from_std(self.promotion_hold).map_err(|e| Error::Internal {
            operation: format!("compute promotion hold: {e}"),
        })?;
        let stale_before = now - hold;

        let held = match (promo.kind, promo.offer_id) {
            (PromoKind::Coupon, _) => {
                self.coupons
                    .hold_coupon(username, &promo.code, receipt, now, stale_before)
                    .await?
            }
            (PromoKind::Offer, Some(offer_id)) => {
                self.offers
                    .hold_redemption(offer_id, username, receipt, now, stale_before)
                    .await?
            }
            (PromoKind::Offer, None) => {
                return Err(Error::Internal {
                    operation: format!("hold offer {}: quote carries no offer id", promo.code),
                });
            }
        };
        if held {
            info!(code = %promo.code, "Promotion held for pending order");
            return Ok(());
        }
        Err(match promo.kind {
            PromoKind::Coupon => PurchaseError::CouponInUse,
            PromoKind::Offer => PurchaseError::OfferUsageExhausted,
        }
        .into())
    }

    /// Give back a hold taken by an order that can no longer be paid
    async fn release_promotion(&self, quote: &PurchaseQuote, receipt: &str) {
        let Some(promo) = &quote.promo else {
            return;
        };
        let released = match (promo.kind, promo.offer_id) {
            (PromoKind::Coupon, _) => self.coupons.release_coupon(&quote.username, &promo.code, receipt).await,
            (PromoKind::Offer, Some(offer_id)) => {
                self.offers
                    .release_redemption(offer_id, &quote.username, receipt)
                    .await
            }
            (PromoKind::Offer, None) => Ok(()),
        };
        if let Err(e) = released {
            error!(code = %promo.code, "Failed to release promotion hold: {}", e);
        }
    }

    /// Consume the promotion an order was priced with. The purchase already succeeded,
    /// so failures are logged and not returned.
    async fn redeem(&self, username: &str, receipt: &str, promo: &AppliedPromotion) {
        let outcome = match (promo.kind, promo.offer_id) {
            (PromoKind::Coupon, _) => self.coupons.mark_used(username, &promo.code).await,
            (PromoKind::Offer, Some(offer_id)) => self.offers.record_redemption(offer_id, username, receipt).await,
            (PromoKind::Offer, None) => {
                warn!(code = %promo.code, "Offer promotion recorded without an offer id");
                return;
            }
        };
        match outcome {
            Ok(true) => info!(code = %promo.code, "Promotion redeemed"),
            Ok(false) => warn!(code = %promo.code, "Promotion was already redeemed"),
            Err(e) => error!(code = %promo.code, "Failed to redeem promotion: {}", e),
        }
    }
}
