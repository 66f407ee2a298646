pub static QUESTION_EXTRACTION_PROMPT: &str = r#"You are analyzing a Laws of the Game referee exam PDF.

Extract ALL quiz questions from the document. Each question has:
- A question number and text
- 4 answer options (A, B, C, D)
- One option marked with a checkmark or similar indicator as correct

For each question, determine:
1. The IFAB Law it relates to (Law 1 through Law 17)
2. A specific law reference if identifiable (e.g., "Law 12.1" for fouls)
3. Your confidence in the extraction (0-1)

IMPORTANT:
- The correct answer is indicated by a checkmark, tick mark, or highlighting
- Carefully identify which option (0=A, 1=B, 2=C, 3=D) is marked correct
- If no clear correct answer indicator, set confidence below 0.5
- Generate a brief explanation for why the answer is correct based on the Laws of the Game

Return a JSON array with this structure:
[
  {
    "text": "Question text here",
    "options": ["Option A", "Option B", "Option C", "Option D"],
    "correctAnswer": 0,
    "explanation": "Brief explanation referencing the relevant law",
    "law": "Law 12",
    "lawReference": "Law 12.1",
    "confidence": 0.95
  }
]

If no questions are found, return an empty array: []

Respond ONLY with the JSON array, no other text."#;
