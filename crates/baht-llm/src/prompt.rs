// Prompt templates for reading Thai receipts and tax invoices.

use baht_core::model::{Account, AccountClass};

/// System instruction shared by every receipt call.
pub fn system_prompt() -> String {
    "You read receipts, tax invoices (ใบกำกับภาษี) and bills for a Thai small-business bookkeeping app.\n\
     Documents may be in Thai, English or both. Amounts are in Thai baht unless another currency is printed.\n\
     Thai documents often print Buddhist Era years (e.g. 2567 = 2024); copy the year exactly as printed.\n\
     Return ONLY a JSON object, no commentary. Use null for anything you cannot read. Never guess a tax ID."
        .to_string()
}

/// Build the user prompt for one document.
///
/// When `accounts` is non-empty, the expense accounts are listed so the model
/// can suggest one by code.
pub fn receipt_prompt(accounts: &[Account]) -> String {
    let mut prompt = String::from(
        "Extract the following fields from the attached document as JSON:\n\
         {\n\
         \x20 \"vendor_name\": string,            // seller / issuer name\n\
         \x20 \"vendor_tax_id\": string,          // 13-digit เลขประจำตัวผู้เสียภาษี of the seller\n\
         \x20 \"vendor_branch\": string,          // สำนักงานใหญ่ = \"00000\", else the 5-digit branch\n\
         \x20 \"vendor_address\": string,\n\
         \x20 \"buyer_name\": string,\n\
         \x20 \"buyer_tax_id\": string,\n\
         \x20 \"document_type\": \"tax_invoice\" | \"receipt\" | \"invoice\" | \"other\",\n\
         \x20 \"document_number\": string,\n\
         \x20 \"issue_date\": \"YYYY-MM-DD\" or \"DD/MM/YYYY\",\n\
         \x20 \"currency\": 3-letter code,\n\
         \x20 \"subtotal\": number,               // before VAT\n\
         \x20 \"vat_rate\": number,               // percent, usually 7\n\
         \x20 \"vat_amount\": number,\n\
         \x20 \"total\": number,                  // including VAT\n\
         \x20 \"wht_rate\": number,               // หัก ณ ที่จ่าย percent, if printed\n\
         \x20 \"wht_amount\": number,\n\
         \x20 \"line_items\": [{ \"description\": string, \"quantity\": number, \"unit_price\": number, \"amount\": number }],\n\
         \x20 \"suggested_account_code\": string,\n\
         \x20 \"confidence\": number              // 0.0-1.0, how sure you are overall\n\
         }\n",
    );

    let expense_accounts: Vec<&Account> = accounts
        .iter()
        .filter(|a| a.class == AccountClass::Expense)
        .collect();

    if !expense_accounts.is_empty() {
        prompt.push_str("\nChoose suggested_account_code from this chart of accounts:\n");
        for account in expense_accounts {
            prompt.push_str(&format!("- {}: {}\n", account.code, account.name));
        }
    }

    prompt
}
