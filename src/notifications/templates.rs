//! HTML bodies for the two post-payment emails.

use html_escape::encode_safe;
use rust_decimal::Decimal;
use serde_json::Value;
use std::fmt::Write;

use super::EmailMessage;
use crate::entities::order_item;
use crate::repositories::OrderWithItems;

/// Expands stored option choices as `<Category>: <name> (+₹<adjustment>)`,
/// one entry per category, joined with `<br>`.
pub fn format_selected_options(options: &Value) -> String {
    let Some(map) = options.as_object() else {
        return String::new();
    };

    map.iter()
        .map(|(category, choice)| {
            let name = match choice.get("name") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let adjustment = match choice.get("price_adjustment") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => "0".to_string(),
                Some(other) => other.to_string(),
            };
            format!(
                "{}: {} (+₹{})",
                encode_safe(category),
                encode_safe(&name),
                encode_safe(&adjustment)
            )
        })
        .collect::<Vec<_>>()
        .join("<br>")
}

fn rupees(amount: Decimal) -> String {
    format!("₹{:.2}", amount)
}

fn items_table(items: &[order_item::Model]) -> String {
    let mut rows = String::new();
    for item in items {
        let _ = write!(
            rows,
            "<tr><td>{title}<br><small>{options}</small></td><td>{qty}</td><td>{unit}</td><td>{line}</td></tr>",
            title = encode_safe(&item.product_title),
            options = format_selected_options(&item.selected_options),
            qty = item.quantity,
            unit = rupees(item.price),
            line = rupees(item.line_total()),
        );
    }

    format!(
        "<table border=\"1\" cellpadding=\"6\" cellspacing=\"0\">\
         <tr><th>Product</th><th>Qty</th><th>Unit price</th><th>Line total</th></tr>{}</table>",
        rows
    )
}

fn summary(order: &OrderWithItems) -> String {
    let o = &order.order;
    format!(
        "<p>Subtotal: {subtotal}<br>Shipping: {shipping}<br><strong>Total paid: {total}</strong></p>\
         <p>Payment ID: {payment}<br>Order ID: {id}</p>",
        subtotal = rupees(o.total_amount),
        shipping = rupees(o.shipping_charge),
        total = rupees(o.grand_total()),
        payment = encode_safe(o.payment_id.as_deref().unwrap_or("-")),
        id = o.id,
    )
}

fn customer_block(order: &OrderWithItems) -> String {
    let o = &order.order;
    format!(
        "<p><strong>{name}</strong><br>{email}<br>{phone}</p>\
         <p>{address}<br>{city}, {state} {pincode}</p>",
        name = encode_safe(&o.full_name),
        email = encode_safe(&o.email),
        phone = encode_safe(&o.phone),
        address = encode_safe(&o.address),
        city = encode_safe(&o.city),
        state = encode_safe(&o.state),
        pincode = encode_safe(&o.pincode),
    )
}

/// Email telling the merchant a paid order is ready to fulfil.
pub fn merchant_notification(
    order: &OrderWithItems,
    store_name: &str,
    merchant_email: &str,
) -> EmailMessage {
    let html_body = format!(
        "<h2>New order on {store}</h2>\
         <h3>Customer</h3>{customer}\
         <h3>Items</h3>{items}{summary}",
        store = encode_safe(store_name),
        customer = customer_block(order),
        items = items_table(&order.items),
        summary = summary(order),
    );

    EmailMessage {
        to: merchant_email.to_string(),
        subject: format!("New order received: {}", order.order.id),
        html_body,
    }
}

/// Receipt sent to the customer after payment is confirmed.
pub fn customer_receipt(order: &OrderWithItems, store_name: &str) -> EmailMessage {
    let html_body = format!(
        "<h2>Thank you for your order, {name}!</h2>\
         <p>Your payment was received and {store} is preparing your order.</p>\
         <h3>Items</h3>{items}{summary}\
         <h3>Shipping to</h3>{customer}",
        name = encode_safe(&order.order.full_name),
        store = encode_safe(store_name),
        items = items_table(&order.items),
        summary = summary(order),
        customer = customer_block(order),
    );

    EmailMessage {
        to: order.order.email.clone(),
        subject: format!("Your order confirmation: {}", order.order.id),
        html_body,
    }
}
